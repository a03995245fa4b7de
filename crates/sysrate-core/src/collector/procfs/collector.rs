//! Raw counter collection from `/proc` and `/sys`.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, MonotonicClock};
use crate::collector::procfs::parser::{
    DiskRow, parse_cpu_stat, parse_cpuinfo_mhz, parse_diskstats, parse_load1,
    parse_mountinfo_device_ids, parse_scaling_freq_khz,
};
use crate::collector::traits::FileSystem;
use crate::collector::{CollectOptions, CollectionError, CounterCollector};
use crate::sample::{EntityId, RawSample};

/// Bytes per sector in `/proc/diskstats`, regardless of the device's
/// physical sector size.
const SECTOR_SIZE: u64 = 512;

/// Device name prefixes that never count as disks.
const VIRTUAL_DEVICE_PREFIXES: &[&str] = &["loop", "ram", "zram"];

/// Collects CPU, disk and filesystem counters from a procfs tree.
///
/// Paths are configurable so a tree copied from another host (or a
/// container's view of the host) can be sampled.
pub struct ProcfsCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    sys_path: String,
    clock: Arc<dyn Clock>,
}

impl<F: FileSystem> ProcfsCollector<F> {
    /// Creates a collector over `/proc` and `/sys` with a monotonic clock.
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            proc_path: "/proc".to_string(),
            sys_path: "/sys".to_string(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Overrides the proc and sys roots.
    pub fn with_paths(mut self, proc_path: impl Into<String>, sys_path: impl Into<String>) -> Self {
        self.proc_path = proc_path.into();
        self.sys_path = sys_path.into();
        self
    }

    /// Overrides the clock used to stamp samples.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn proc_path(&self) -> &str {
        &self.proc_path
    }

    fn proc_file(&self, rel: &str) -> PathBuf {
        Path::new(&self.proc_path).join(rel)
    }

    fn sys_file(&self, rel: &str) -> PathBuf {
        Path::new(&self.sys_path).join(rel)
    }

    fn read(&self, path: &Path) -> Result<String, CollectionError> {
        self.fs.read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CollectionError::Unavailable(path.display().to_string()),
            _ => CollectionError::Io(e),
        })
    }

    /// Names of whole block devices under `<sys>/block`, or `None` when the
    /// directory cannot be listed.
    fn block_devices(&self) -> Option<HashSet<String>> {
        let entries = self.fs.read_dir(&self.sys_file("block")).ok()?;
        let names: HashSet<String> = entries
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        (!names.is_empty()).then_some(names)
    }

    /// `/proc/diskstats` rows for whole, non-virtual block devices.
    fn whole_disks(&self) -> Result<Vec<DiskRow>, CollectionError> {
        let content = self.read(&self.proc_file("diskstats"))?;
        let disks = parse_diskstats(&content)?;
        let block = self.block_devices();

        Ok(disks
            .into_iter()
            .filter(|d| !is_virtual_device(&d.name))
            .filter(|d| match &block {
                Some(names) => names.contains(&d.name),
                None => !looks_like_partition(&d.name),
            })
            .collect())
    }
}

impl<F: FileSystem> CounterCollector for ProcfsCollector<F> {
    fn collect_cpu(&self, _options: &CollectOptions) -> Result<Vec<RawSample>, CollectionError> {
        let content = self.read(&self.proc_file("stat"))?;
        let cpus = parse_cpu_stat(&content)?;
        let now = self.clock.now_ms();

        let samples: Vec<RawSample> = cpus
            .into_iter()
            .filter_map(|cpu| {
                let id = cpu.core?;
                Some(
                    RawSample::new(EntityId::cpu(id), now)
                        .with_counter("user", cpu.user)
                        .with_counter("nice", cpu.nice)
                        .with_counter("system", cpu.system)
                        .with_counter("idle", cpu.idle_total())
                        .with_counter("irq", cpu.irq_total())
                        .with_counter("steal", cpu.steal)
                        .with_counter("guest", cpu.guest),
                )
            })
            .collect();

        if samples.is_empty() {
            return Err(CollectionError::Parse(
                "no per-core lines in /proc/stat".to_string(),
            ));
        }
        Ok(samples)
    }

    fn collect_disks(&self, options: &CollectOptions) -> Result<Vec<RawSample>, CollectionError> {
        let disks = self.whole_disks()?;
        let now = self.clock.now_ms();

        Ok(disks
            .into_iter()
            .filter(|d| options.wants_device(&d.name))
            .map(|d| {
                RawSample::new(EntityId::disk(d.name.as_str()), now)
                    .with_counter("reads", d.reads)
                    .with_counter("writes", d.writes)
                    .with_counter("sectors_read", d.sectors_read)
                    .with_counter("sectors_written", d.sectors_written)
                    .with_counter("read_time_ms", d.read_ms)
                    .with_counter("write_time_ms", d.write_ms)
                    .with_counter("io_time_ms", d.io_ms)
            })
            .collect())
    }

    fn collect_filesystem(&self, _options: &CollectOptions) -> Result<RawSample, CollectionError> {
        let content = self.read(&self.proc_file("diskstats"))?;
        let all = parse_diskstats(&content)?;
        let now = self.clock.now_ms();

        let mounted: HashSet<(u32, u32)> = self
            .read(&self.proc_file("self/mountinfo"))
            .map(|c| parse_mountinfo_device_ids(&c))
            .unwrap_or_default();

        let mut selected: Vec<&DiskRow> = all
            .iter()
            .filter(|d| !is_virtual_device(&d.name))
            .filter(|d| mounted.contains(&(d.major, d.minor)))
            .collect();

        if selected.is_empty() {
            debug!("no mounted block devices matched, summing whole disks");
            let block = self.block_devices();
            selected = all
                .iter()
                .filter(|d| !is_virtual_device(&d.name))
                .filter(|d| match &block {
                    Some(names) => names.contains(&d.name),
                    None => !looks_like_partition(&d.name),
                })
                .collect();
        }

        let sectors_read: u64 = selected.iter().map(|d| d.sectors_read).sum();
        let sectors_written: u64 = selected.iter().map(|d| d.sectors_written).sum();

        Ok(RawSample::new(EntityId::fs_aggregate(), now)
            .with_counter("bytes_read", sectors_read * SECTOR_SIZE)
            .with_counter("bytes_written", sectors_written * SECTOR_SIZE))
    }

    fn load_average(&self, _options: &CollectOptions) -> Result<f64, CollectionError> {
        let content = self.read(&self.proc_file("loadavg"))?;
        Ok(parse_load1(&content)?)
    }

    fn cpu_speeds_mhz(&self, _options: &CollectOptions) -> Result<Vec<f64>, CollectionError> {
        if let Ok(content) = self.read(&self.proc_file("cpuinfo")) {
            let mhz = parse_cpuinfo_mhz(&content);
            if !mhz.is_empty() {
                return Ok(mhz);
            }
        }

        // cpufreq fallback, ordered by core number
        let cpu_dir = self.sys_file("devices/system/cpu");
        let mut cores: Vec<(u32, PathBuf)> = self
            .fs
            .read_dir(&cpu_dir)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                let n = p
                    .file_name()?
                    .to_str()?
                    .strip_prefix("cpu")?
                    .parse::<u32>()
                    .ok()?;
                Some((n, p))
            })
            .collect();
        cores.sort_by_key(|(n, _)| *n);

        let mut mhz = Vec::with_capacity(cores.len());
        for (_, dir) in cores {
            let path = dir.join("cpufreq/scaling_cur_freq");
            if let Ok(content) = self.fs.read_to_string(&path) {
                mhz.push(parse_scaling_freq_khz(&content)?);
            }
        }

        if mhz.is_empty() {
            return Err(CollectionError::Unavailable("cpu frequency".to_string()));
        }
        Ok(mhz)
    }
}

fn is_virtual_device(name: &str) -> bool {
    VIRTUAL_DEVICE_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Name-based partition guess used when `/sys/block` is not readable:
/// `sda1`, `vdb2`, `nvme0n1p3`, `mmcblk0p1`.
fn looks_like_partition(name: &str) -> bool {
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return name
            .rsplit_once('p')
            .is_some_and(|(head, tail)| {
                !tail.is_empty()
                    && tail.chars().all(|c| c.is_ascii_digit())
                    && head.ends_with(|c: char| c.is_ascii_digit())
            });
    }
    name.ends_with(|c: char| c.is_ascii_digit())
}
