//! Public query functions.
//!
//! Each query asks the platform's collector for fresh counters, diffs them
//! against the [`SampleStore`] and aggregates the result. A failed, timed-out
//! or cancelled collection is a missed sample: the store is left alone and
//! the last known rates of the class are returned instead.
//!
//! ```
//! use std::sync::Arc;
//! use sysrate_core::collector::{MockFs, ProcfsCollector};
//! use sysrate_core::{Platform, QueryOptions, Sampler, SamplerConfig};
//!
//! let sampler = Sampler::new(SamplerConfig::default()).with_collector(
//!     Platform::Linux,
//!     Arc::new(ProcfsCollector::new(MockFs::typical_system())),
//! );
//! let opts = QueryOptions::default().for_platform(Platform::Linux);
//! let load = sampler.current_load(&opts).unwrap();
//! assert_eq!(load.cpus.len(), 4);
//! assert_eq!(load.current_load, 0.0); // first call is a baseline
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::aggregate::{
    CpuSpeed, DisksIo, FsStatsSnapshot, LoadSnapshot, build_disks, build_fs, build_load,
    build_speed,
};
use crate::collector::{CollectOptions, CollectionError, CounterCollector, ProcfsCollector, RealFs};
use crate::config::SamplerConfig;
use crate::platform::Platform;
use crate::sample::{EntityClass, EntityId, EntityRates, RawSample};
use crate::store::{Observation, SampleStore};

/// How often a waiting query re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Cloneable cancellation flag shared between a caller and its queries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call options shared by every query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Collector to use; the host platform when `None`.
    pub platform: Option<Platform>,
    /// Device names to report; empty reports every device.
    pub devices: Vec<String>,
    /// Collection deadline, overriding [`SamplerConfig::collect_timeout`].
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl QueryOptions {
    pub fn for_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }

    fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            devices: self.devices.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

/// Errors returned to query callers.
///
/// Collection failures never surface here; they degrade to cached rates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// No collector for `platform` can produce `class` counters.
    Unsupported {
        platform: Platform,
        class: EntityClass,
    },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Unsupported { platform, class } => {
                write!(f, "{} metrics are not supported on {}", class, platform)
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// A registered collector and the baselines of the entities it reports.
struct Source {
    collector: Arc<dyn CounterCollector>,
    store: SampleStore,
}

/// On-demand sampler owning the collector registry and one sample store per
/// platform.
///
/// Safe to share between threads; concurrent queries over the same entities
/// are serialized by the store. Entities of different platforms never share
/// a baseline, so `cpu:0` of a remote tree is not diffed against the local one.
pub struct Sampler {
    config: SamplerConfig,
    sources: HashMap<Platform, Source>,
    last_speed: Mutex<HashMap<Platform, CpuSpeed>>,
}

impl Sampler {
    /// Creates a sampler with no collectors registered.
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            last_speed: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a sampler reading the real `/proc` and `/sys` trees under the
    /// given roots, registered for every platform with a procfs layout.
    pub fn procfs(config: SamplerConfig, proc_path: &str, sys_path: &str) -> Self {
        let collector: Arc<dyn CounterCollector> =
            Arc::new(ProcfsCollector::new(RealFs::new()).with_paths(proc_path, sys_path));
        let mut sampler = Self::new(config);
        for platform in Platform::ALL.into_iter().filter(|p| p.has_procfs()) {
            sampler.register(platform, Arc::clone(&collector));
        }
        sampler
    }

    /// Sampler with the collectors available on this host.
    pub fn for_host(config: SamplerConfig) -> Self {
        Self::procfs(config, "/proc", "/sys")
    }

    pub fn with_collector(
        mut self,
        platform: Platform,
        collector: Arc<dyn CounterCollector>,
    ) -> Self {
        self.register(platform, collector);
        self
    }

    /// Registers (or replaces) the collector for `platform`. Replacing a
    /// collector drops the baselines of the previous one.
    pub fn register(&mut self, platform: Platform, collector: Arc<dyn CounterCollector>) {
        self.sources.insert(
            platform,
            Source {
                collector,
                store: SampleStore::new(),
            },
        );
    }


    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Sample store of `platform`, if a collector is registered for it.
    pub fn store(&self, platform: Platform) -> Option<&SampleStore> {
        self.sources.get(&platform).map(|s| &s.store)
    }

    /// Whole-machine and per-core CPU load since the previous call.
    pub fn current_load(&self, options: &QueryOptions) -> Result<LoadSnapshot, QueryError> {
        let (platform, source) = self.source_for(options, EntityClass::Cpu)?;
        let cores = self.sample(source, platform, options, EntityClass::Cpu, |c, o| {
            c.collect_cpu(o)
        })?;

        let load1 = match self.run(&source.collector, options, |c, o| c.load_average(o)) {
            Ok(l) => Some(l),
            Err(e) => {
                debug!("load average unavailable on {}: {}", platform, e);
                None
            }
        };

        Ok(build_load(&cores, load1))
    }

    /// Per-device and total disk throughput since the previous call.
    pub fn disks_io(&self, options: &QueryOptions) -> Result<DisksIo, QueryError> {
        let (platform, source) = self.source_for(options, EntityClass::Disk)?;
        let devices = self.sample(source, platform, options, EntityClass::Disk, |c, o| {
            c.collect_disks(o)
        })?;
        Ok(build_disks(&devices))
    }

    /// Filesystem read/write throughput since the previous call.
    pub fn fs_stats(&self, options: &QueryOptions) -> Result<FsStatsSnapshot, QueryError> {
        let (platform, source) = self.source_for(options, EntityClass::Fs)?;
        let rates = self.sample(source, platform, options, EntityClass::Fs, |c, o| {
            c.collect_filesystem(o).map(|s| vec![s])
        })?;

        let aggregate = EntityId::fs_aggregate();
        Ok(rates
            .iter()
            .find(|r| r.entity == aggregate)
            .map(build_fs)
            .unwrap_or_default())
    }

    /// Current clock speed per core. Falls back to the last good reading
    /// when the frequency source fails.
    pub fn cpu_current_speed(&self, options: &QueryOptions) -> Result<CpuSpeed, QueryError> {
        let (platform, source) = self.source_for(options, EntityClass::Cpu)?;
        let result = self.run(&source.collector, options, |c, o| c.cpu_speeds_mhz(o));
        let mut last = self
            .last_speed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match result {
            Ok(mhz) => {
                let speed = build_speed(&mhz);
                last.insert(platform, speed.clone());
                Ok(speed)
            }
            Err(CollectionError::Unsupported(class)) => {
                Err(QueryError::Unsupported { platform, class })
            }
            Err(e) => {
                warn!("cpu speed collection failed on {}: {}", platform, e);
                Ok(last.get(&platform).cloned().unwrap_or_default())
            }
        }
    }

    fn source_for(
        &self,
        options: &QueryOptions,
        class: EntityClass,
    ) -> Result<(Platform, &Source), QueryError> {
        let platform = options.platform();
        match self.sources.get(&platform) {
            Some(source) => Ok((platform, source)),
            None => Err(QueryError::Unsupported { platform, class }),
        }
    }

    /// Collects one class and feeds it through the platform's store, or
    /// falls back to the cached rates of that class.
    fn sample<F>(
        &self,
        source: &Source,
        platform: Platform,
        options: &QueryOptions,
        class: EntityClass,
        collect: F,
    ) -> Result<Vec<EntityRates>, QueryError>
    where
        F: FnOnce(&dyn CounterCollector, &CollectOptions) -> Result<Vec<RawSample>, CollectionError>
            + Send
            + 'static,
    {
        match self.run(&source.collector, options, collect) {
            Ok(samples) => Ok(source
                .store
                .observe_batch(samples, &self.config.limits())
                .into_iter()
                .map(Observation::into_rates)
                .collect()),
            Err(CollectionError::Unsupported(class)) => {
                Err(QueryError::Unsupported { platform, class })
            }
            Err(e) => {
                warn!(
                    "{} collection failed on {}: {}, returning cached rates",
                    class, platform, e
                );
                let filter = options.collect_options();
                Ok(source
                    .store
                    .cached_rates(class)
                    .into_iter()
                    .filter(|r| class != EntityClass::Disk || filter.wants_device(&r.entity.name))
                    .collect())
            }
        }
    }

    /// Runs one collector call, on a worker thread when a deadline or a
    /// cancel token applies.
    fn run<T, F>(
        &self,
        collector: &Arc<dyn CounterCollector>,
        options: &QueryOptions,
        collect: F,
    ) -> Result<T, CollectionError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CounterCollector, &CollectOptions) -> Result<T, CollectionError>
            + Send
            + 'static,
    {
        if options.is_cancelled() {
            return Err(CollectionError::Cancelled);
        }

        let timeout = options.timeout.or(self.config.collect_timeout);
        if timeout.is_none() && options.cancel.is_none() {
            return collect(collector.as_ref(), &options.collect_options());
        }

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(collector);
        let collect_opts = options.collect_options();
        thread::Builder::new()
            .name("sysrate-collect".to_string())
            .spawn(move || {
                // The receiver is gone once the caller gave up.
                let _ = tx.send(collect(worker.as_ref(), &collect_opts));
            })?;

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let slice = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(CollectionError::TimedOut(timeout.unwrap_or_default()));
                    }
                    left.min(CANCEL_POLL)
                }
                None => CANCEL_POLL,
            };

            match rx.recv_timeout(slice) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if options.is_cancelled() {
                        return Err(CollectionError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CollectionError::Unavailable(
                        "collector thread exited without a result".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::ScriptedCollector;

    fn linux() -> QueryOptions {
        QueryOptions::default().for_platform(Platform::Linux)
    }

    fn core(id: u32, ts: u64, user: u64, idle: u64) -> RawSample {
        RawSample::new(EntityId::cpu(id), ts)
            .with_counter("user", user)
            .with_counter("idle", idle)
    }

    fn linux_store(sampler: &Sampler) -> &SampleStore {
        sampler.store(Platform::Linux).unwrap()
    }

    fn scripted() -> (Arc<ScriptedCollector>, Sampler) {
        let script = Arc::new(ScriptedCollector::new());
        let sampler = Sampler::new(SamplerConfig::default())
            .with_collector(Platform::Linux, script.clone());
        (script, sampler)
    }

    #[test]
    fn missing_collector_is_unsupported() {
        let sampler = Sampler::new(SamplerConfig::default());
        let opts = QueryOptions::default().for_platform(Platform::Windows);
        let err = sampler.disks_io(&opts).unwrap_err();
        assert_eq!(
            err,
            QueryError::Unsupported {
                platform: Platform::Windows,
                class: EntityClass::Disk
            }
        );
        assert_eq!(err.to_string(), "disk metrics are not supported on win32");
    }

    #[test]
    fn collector_reported_unsupported_class() {
        let (script, sampler) = scripted();
        script.mark_unsupported(EntityClass::Fs);
        let err = sampler.fs_stats(&linux()).unwrap_err();
        assert!(matches!(
            err,
            QueryError::Unsupported {
                class: EntityClass::Fs,
                ..
            }
        ));
    }

    #[test]
    fn half_busy_core() {
        let (script, sampler) = scripted();
        script.push_cpu(vec![core(0, 0, 100, 900)]);
        script.push_cpu(vec![core(0, 1000, 150, 950)]);

        let first = sampler.current_load(&linux()).unwrap();
        assert_eq!(first.current_load, 0.0);
        let second = sampler.current_load(&linux()).unwrap();
        assert!((second.current_load - 50.0).abs() < 1e-9);
        assert_eq!(second.raw_current_load_user, 50);
        assert_eq!(second.raw_current_load_idle, 50);
    }

    #[test]
    fn failed_collection_returns_cached_rates() {
        let (script, sampler) = scripted();
        script.push_cpu(vec![core(0, 0, 100, 900)]);
        script.push_cpu(vec![core(0, 1000, 150, 950)]);
        script.push_cpu_error(CollectionError::Parse("garbled".to_string()));

        sampler.current_load(&linux()).unwrap();
        let good = sampler.current_load(&linux()).unwrap();
        let fallback = sampler.current_load(&linux()).unwrap();
        assert_eq!(good, fallback);

        let cached = linux_store(&sampler).get(&EntityId::cpu(0)).unwrap();
        assert_eq!(cached.last_sample.timestamp_ms, 1000);
    }

    #[test]
    fn failure_without_baseline_is_all_zero() {
        let (_script, sampler) = scripted();
        let io = sampler.disks_io(&linux()).unwrap();
        assert!(io.devices.is_empty());
        assert_eq!(io.total.tx_sec, 0.0);
        assert_eq!(sampler.fs_stats(&linux()).unwrap(), FsStatsSnapshot::default());
    }

    #[test]
    fn timeout_leaves_store_untouched() {
        let (script, sampler) = scripted();
        script.push_cpu(vec![core(0, 0, 100, 900)]);
        sampler.current_load(&linux()).unwrap();
        let before = linux_store(&sampler).get(&EntityId::cpu(0));

        script.set_delay(Some(Duration::from_millis(300)));
        script.push_cpu(vec![core(0, 1000, 150, 950)]);
        let opts = linux().with_timeout(Duration::from_millis(20));
        let load = sampler.current_load(&opts).unwrap();

        assert_eq!(load.current_load, 0.0);
        assert_eq!(linux_store(&sampler).get(&EntityId::cpu(0)), before);
    }

    #[test]
    fn cancelled_query_never_calls_collector() {
        let (script, sampler) = scripted();
        let token = CancelToken::new();
        token.cancel();
        let opts = linux().with_cancel(token);

        let load = sampler.current_load(&opts).unwrap();
        assert!(load.cpus.is_empty());
        assert_eq!(script.calls(EntityClass::Cpu), 0);
        assert!(linux_store(&sampler).is_empty());
    }

    #[test]
    fn cancel_during_slow_collection() {
        let (script, sampler) = scripted();
        script.set_delay(Some(Duration::from_millis(500)));
        script.push_cpu(vec![core(0, 0, 1, 1)]);
        let token = CancelToken::new();
        let opts = linux().with_cancel(token.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            token.cancel();
        });
        let started = Instant::now();
        sampler.current_load(&opts).unwrap();
        canceller.join().unwrap();

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(linux_store(&sampler).is_empty());
    }

    #[test]
    fn cached_disks_respect_device_filter() {
        let (script, sampler) = scripted();
        script.push_disks(vec![
            RawSample::new(EntityId::disk("sda"), 0).with_counter("reads", 1),
            RawSample::new(EntityId::disk("sdb"), 0).with_counter("reads", 1),
        ]);
        sampler.disks_io(&linux()).unwrap();

        let opts = linux().with_devices(["sdb"]);
        let io = sampler.disks_io(&opts).unwrap();
        assert_eq!(io.devices.len(), 1);
        assert_eq!(io.devices[0].name, "sdb");
    }

    #[test]
    fn speed_falls_back_to_last_reading() {
        let (script, sampler) = scripted();
        script.push_speeds(vec![2000.0, 3000.0]);

        let speed = sampler.cpu_current_speed(&linux()).unwrap();
        assert_eq!(speed.avg, 2.5);
        let again = sampler.cpu_current_speed(&linux()).unwrap();
        assert_eq!(again, speed);
    }

    #[test]
    fn platforms_keep_separate_baselines() {
        let (local, sampler) = scripted();
        let remote = Arc::new(ScriptedCollector::new());
        let sampler = sampler.with_collector(Platform::Android, remote.clone());
        let android = QueryOptions::default().for_platform(Platform::Android);

        local.push_cpu(vec![core(0, 0, 100, 900)]);
        remote.push_cpu(vec![core(0, 1000, 5000, 5000)]);
        remote.push_cpu(vec![core(0, 2000, 5100, 5300)]);

        sampler.current_load(&linux()).unwrap();
        let first = sampler.current_load(&android).unwrap();
        assert_eq!(first.current_load, 0.0);
        assert_eq!(first.raw_current_load_user, 0);
        assert_eq!(first.raw_current_load_idle, 0);

        let second = sampler.current_load(&android).unwrap();
        assert_eq!(second.raw_current_load_user, 100);
        assert!((second.current_load - 25.0).abs() < 1e-9);

        let cached = linux_store(&sampler).get(&EntityId::cpu(0)).unwrap();
        assert_eq!(cached.last_sample.counter("user"), Some(100));
        assert_eq!(cached.last_sample.timestamp_ms, 0);
    }

    #[test]
    fn fallback_only_sees_own_platform() {
        let (local, sampler) = scripted();
        let remote = Arc::new(ScriptedCollector::new());
        let sampler = sampler.with_collector(Platform::Android, remote.clone());
        let android = QueryOptions::default().for_platform(Platform::Android);

        local.push_disks(vec![
            RawSample::new(EntityId::disk("sda"), 0).with_counter("reads", 1),
        ]);
        sampler.disks_io(&linux()).unwrap();

        // No reading queued for the remote tree: the query degrades to its
        // own (empty) cache.
        let io = sampler.disks_io(&android).unwrap();
        assert!(io.devices.is_empty());
    }

    #[test]
    fn procfs_sampler_registers_procfs_platforms() {
        let sampler = Sampler::procfs(SamplerConfig::default(), "/proc", "/sys");
        for platform in Platform::ALL {
            assert_eq!(sampler.store(platform).is_some(), platform.has_procfs());
        }
    }

    #[test]
    fn load_average_feeds_avg_load() {
        let (script, sampler) = scripted();
        script.push_cpu(vec![core(0, 0, 1, 1), core(1, 0, 1, 1)]);
        script.push_load(3.0);

        let load = sampler.current_load(&linux()).unwrap();
        assert_eq!(load.avg_load, 1.5);
    }
}
