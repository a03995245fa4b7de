//! A collector that replays queued readings.
//!
//! Used to drive the sampler through exact counter sequences, failures and
//! slow collections without touching any real data source.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::collector::{CollectOptions, CollectionError, CounterCollector};
use crate::sample::{EntityClass, RawSample};

#[derive(Default)]
struct Script {
    cpu: VecDeque<Result<Vec<RawSample>, CollectionError>>,
    disks: VecDeque<Result<Vec<RawSample>, CollectionError>>,
    filesystem: VecDeque<Result<RawSample, CollectionError>>,
    load: VecDeque<f64>,
    speeds: VecDeque<Vec<f64>>,
    unsupported: HashSet<EntityClass>,
    calls: [usize; 3],
    delay: Option<Duration>,
}

fn class_index(class: EntityClass) -> usize {
    match class {
        EntityClass::Cpu => 0,
        EntityClass::Disk => 1,
        EntityClass::Fs => 2,
    }
}

/// Replays queued responses in FIFO order, one per call.
///
/// An empty queue answers with [`CollectionError::Unavailable`]. All methods
/// take `&self`, so a test can keep an `Arc` and keep feeding readings after
/// the collector has been registered.
#[derive(Default)]
pub struct ScriptedCollector {
    script: Mutex<Script>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_cpu(&self, samples: Vec<RawSample>) {
        self.lock().cpu.push_back(Ok(samples));
    }

    pub fn push_cpu_error(&self, err: CollectionError) {
        self.lock().cpu.push_back(Err(err));
    }

    pub fn push_disks(&self, samples: Vec<RawSample>) {
        self.lock().disks.push_back(Ok(samples));
    }

    pub fn push_disks_error(&self, err: CollectionError) {
        self.lock().disks.push_back(Err(err));
    }

    pub fn push_filesystem(&self, sample: RawSample) {
        self.lock().filesystem.push_back(Ok(sample));
    }

    pub fn push_filesystem_error(&self, err: CollectionError) {
        self.lock().filesystem.push_back(Err(err));
    }

    pub fn push_load(&self, load1: f64) {
        self.lock().load.push_back(load1);
    }

    pub fn push_speeds(&self, mhz: Vec<f64>) {
        self.lock().speeds.push_back(mhz);
    }

    /// Makes every call for `class` fail with [`CollectionError::Unsupported`].
    pub fn mark_unsupported(&self, class: EntityClass) {
        self.lock().unsupported.insert(class);
    }

    /// Makes every collection sleep before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    /// Number of collection calls made for `class`.
    pub fn calls(&self, class: EntityClass) -> usize {
        self.lock().calls[class_index(class)]
    }

    fn begin(&self, class: EntityClass) -> Result<(), CollectionError> {
        let delay = {
            let mut script = self.lock();
            script.calls[class_index(class)] += 1;
            if script.unsupported.contains(&class) {
                return Err(CollectionError::Unsupported(class));
            }
            script.delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

fn exhausted(class: EntityClass) -> CollectionError {
    CollectionError::Unavailable(format!("no scripted {} reading", class))
}

impl CounterCollector for ScriptedCollector {
    fn collect_cpu(&self, _options: &CollectOptions) -> Result<Vec<RawSample>, CollectionError> {
        self.begin(EntityClass::Cpu)?;
        self.lock()
            .cpu
            .pop_front()
            .unwrap_or_else(|| Err(exhausted(EntityClass::Cpu)))
    }

    fn collect_disks(&self, options: &CollectOptions) -> Result<Vec<RawSample>, CollectionError> {
        self.begin(EntityClass::Disk)?;
        let samples = self
            .lock()
            .disks
            .pop_front()
            .unwrap_or_else(|| Err(exhausted(EntityClass::Disk)))?;
        Ok(samples
            .into_iter()
            .filter(|s| options.wants_device(&s.entity.name))
            .collect())
    }

    fn collect_filesystem(&self, _options: &CollectOptions) -> Result<RawSample, CollectionError> {
        self.begin(EntityClass::Fs)?;
        self.lock()
            .filesystem
            .pop_front()
            .unwrap_or_else(|| Err(exhausted(EntityClass::Fs)))
    }

    fn load_average(&self, _options: &CollectOptions) -> Result<f64, CollectionError> {
        self.lock()
            .load
            .pop_front()
            .ok_or_else(|| CollectionError::Unavailable("load average".to_string()))
    }

    fn cpu_speeds_mhz(&self, _options: &CollectOptions) -> Result<Vec<f64>, CollectionError> {
        self.lock()
            .speeds
            .pop_front()
            .ok_or_else(|| CollectionError::Unavailable("cpu frequency".to_string()))
    }
}
