//! Summary views built from per-entity rates.
//!
//! Totals never average per-entity percentages or rates: they sum the raw
//! deltas first and derive the figure from the sums, over the largest elapsed
//! time among the members.

use serde::{Deserialize, Serialize};

use crate::rates::per_second;
use crate::sample::{Counters, EntityRates, RateSnapshot};

/// Bytes per `/proc/diskstats` sector.
const SECTOR_BYTES: u64 = 512;

fn pct(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn counter(counters: &Counters, name: &str) -> u64 {
    counters.get(name).copied().unwrap_or(0)
}

// ============ CPU load ============

/// Tick deltas of one core, or of all cores summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CpuTicks {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    irq: u64,
    steal: u64,
    guest: u64,
}

impl CpuTicks {
    fn from_rates(rates: &RateSnapshot) -> Self {
        Self {
            user: rates.delta("user"),
            nice: rates.delta("nice"),
            system: rates.delta("system"),
            idle: rates.delta("idle"),
            irq: rates.delta("irq"),
            steal: rates.delta("steal"),
            guest: rates.delta("guest"),
        }
    }

    fn add(&mut self, other: &CpuTicks) {
        self.user += other.user;
        self.nice += other.nice;
        self.system += other.system;
        self.idle += other.idle;
        self.irq += other.irq;
        self.steal += other.steal;
        self.guest += other.guest;
    }

    fn total(&self) -> u64 {
        self.user + self.nice + self.system + self.idle + self.irq + self.steal + self.guest
    }

    fn busy(&self) -> u64 {
        self.total() - self.idle
    }
}

/// Load of a single core over the last sampling window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreLoad {
    pub core: u32,
    pub load: f64,
    pub load_user: f64,
    pub load_system: f64,
    pub load_nice: f64,
    pub load_idle: f64,
    pub load_irq: f64,
    pub load_steal: f64,
    pub load_guest: f64,
    /// Busy ticks (everything but idle).
    pub raw_load: u64,
    pub raw_load_user: u64,
    pub raw_load_system: u64,
    pub raw_load_nice: u64,
    pub raw_load_idle: u64,
    pub raw_load_irq: u64,
    pub raw_load_steal: u64,
    pub raw_load_guest: u64,
}

impl CoreLoad {
    fn from_ticks(core: u32, t: &CpuTicks) -> Self {
        let total = t.total();
        Self {
            core,
            load: pct(t.busy(), total),
            load_user: pct(t.user, total),
            load_system: pct(t.system, total),
            load_nice: pct(t.nice, total),
            load_idle: pct(t.idle, total),
            load_irq: pct(t.irq, total),
            load_steal: pct(t.steal, total),
            load_guest: pct(t.guest, total),
            raw_load: t.busy(),
            raw_load_user: t.user,
            raw_load_system: t.system,
            raw_load_nice: t.nice,
            raw_load_idle: t.idle,
            raw_load_irq: t.irq,
            raw_load_steal: t.steal,
            raw_load_guest: t.guest,
        }
    }

    /// All ticks the core spent in any state during the window.
    pub fn raw_ticks(&self) -> u64 {
        self.raw_load + self.raw_load_idle
    }
}

/// Whole-machine CPU load plus the per-core breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    /// One-minute load average divided by the core count.
    pub avg_load: f64,
    pub current_load: f64,
    pub current_load_user: f64,
    pub current_load_system: f64,
    pub current_load_nice: f64,
    pub current_load_idle: f64,
    pub current_load_irq: f64,
    pub current_load_steal: f64,
    pub current_load_guest: f64,
    pub raw_current_load: u64,
    pub raw_current_load_user: u64,
    pub raw_current_load_system: u64,
    pub raw_current_load_nice: u64,
    pub raw_current_load_idle: u64,
    pub raw_current_load_irq: u64,
    pub raw_current_load_steal: u64,
    pub raw_current_load_guest: u64,
    /// Length of the sampling window.
    pub ms: u64,
    pub cpus: Vec<CoreLoad>,
}

/// Builds the CPU load summary from per-core rates.
///
/// `load1` is the one-minute load average, when the platform has one.
pub fn build_load(cores: &[EntityRates], load1: Option<f64>) -> LoadSnapshot {
    let mut total = CpuTicks::default();
    let mut cpus = Vec::with_capacity(cores.len());
    let mut ms = 0;

    for (i, core) in cores.iter().enumerate() {
        let ticks = CpuTicks::from_rates(&core.rates);
        total.add(&ticks);
        ms = ms.max(core.rates.elapsed_ms);
        let id = core.entity.name.parse().unwrap_or(i as u32);
        cpus.push(CoreLoad::from_ticks(id, &ticks));
    }

    let avg_load = match load1 {
        Some(l) if !cores.is_empty() => round2(l / cores.len() as f64),
        _ => 0.0,
    };

    let all = CoreLoad::from_ticks(0, &total);
    LoadSnapshot {
        avg_load,
        current_load: all.load,
        current_load_user: all.load_user,
        current_load_system: all.load_system,
        current_load_nice: all.load_nice,
        current_load_idle: all.load_idle,
        current_load_irq: all.load_irq,
        current_load_steal: all.load_steal,
        current_load_guest: all.load_guest,
        raw_current_load: all.raw_load,
        raw_current_load_user: all.raw_load_user,
        raw_current_load_system: all.raw_load_system,
        raw_current_load_nice: all.raw_load_nice,
        raw_current_load_idle: all.raw_load_idle,
        raw_current_load_irq: all.raw_load_irq,
        raw_current_load_steal: all.raw_load_steal,
        raw_current_load_guest: all.raw_load_guest,
        ms,
        cpus,
    }
}

// ============ Disk I/O ============

/// Cumulative disk counters and their deltas over one window.
#[derive(Debug, Clone, Copy, Default)]
struct DiskSums {
    reads: u64,
    writes: u64,
    read_time: u64,
    write_time: u64,
    io_time: u64,
    d_reads: u64,
    d_writes: u64,
    d_sectors_read: u64,
    d_sectors_written: u64,
    d_read_time: u64,
    d_write_time: u64,
    d_io_time: u64,
}

impl DiskSums {
    fn from_entity(e: &EntityRates) -> Self {
        let r = &e.rates;
        Self {
            reads: counter(&e.counters, "reads"),
            writes: counter(&e.counters, "writes"),
            read_time: counter(&e.counters, "read_time_ms"),
            write_time: counter(&e.counters, "write_time_ms"),
            io_time: counter(&e.counters, "io_time_ms"),
            d_reads: r.delta("reads"),
            d_writes: r.delta("writes"),
            d_sectors_read: r.delta("sectors_read"),
            d_sectors_written: r.delta("sectors_written"),
            d_read_time: r.delta("read_time_ms"),
            d_write_time: r.delta("write_time_ms"),
            d_io_time: r.delta("io_time_ms"),
        }
    }

    fn add(&mut self, o: &DiskSums) {
        self.reads += o.reads;
        self.writes += o.writes;
        self.read_time += o.read_time;
        self.write_time += o.write_time;
        self.io_time += o.io_time;
        self.d_reads += o.d_reads;
        self.d_writes += o.d_writes;
        self.d_sectors_read += o.d_sectors_read;
        self.d_sectors_written += o.d_sectors_written;
        self.d_read_time += o.d_read_time;
        self.d_write_time += o.d_write_time;
        self.d_io_time += o.d_io_time;
    }
}

/// Throughput of one block device (or of all of them).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskIoSnapshot {
    pub name: String,
    /// Completed reads since boot.
    pub r_io: u64,
    pub w_io: u64,
    pub t_io: u64,
    pub r_io_sec: f64,
    pub w_io_sec: f64,
    pub t_io_sec: f64,
    /// Bytes per second.
    pub rx_sec: f64,
    pub wx_sec: f64,
    pub tx_sec: f64,
    /// Milliseconds spent on I/O since boot.
    pub r_wait_time: u64,
    pub w_wait_time: u64,
    pub t_wait_time: u64,
    /// Share of the window spent waiting on I/O. Above 100 for queued devices.
    pub r_wait_percent: f64,
    pub w_wait_percent: f64,
    pub t_wait_percent: f64,
    pub ms: u64,
}

impl DiskIoSnapshot {
    fn from_sums(name: String, s: &DiskSums, ms: u64) -> Self {
        let r_io_sec = per_second(s.d_reads, ms);
        let w_io_sec = per_second(s.d_writes, ms);
        let rx_sec = per_second(s.d_sectors_read * SECTOR_BYTES, ms);
        let wx_sec = per_second(s.d_sectors_written * SECTOR_BYTES, ms);
        let wait_pct = |d: u64| if ms == 0 { 0.0 } else { d as f64 * 100.0 / ms as f64 };

        Self {
            name,
            r_io: s.reads,
            w_io: s.writes,
            t_io: s.reads + s.writes,
            r_io_sec,
            w_io_sec,
            t_io_sec: r_io_sec + w_io_sec,
            rx_sec,
            wx_sec,
            tx_sec: rx_sec + wx_sec,
            r_wait_time: s.read_time,
            w_wait_time: s.write_time,
            t_wait_time: s.io_time,
            r_wait_percent: wait_pct(s.d_read_time),
            w_wait_percent: wait_pct(s.d_write_time),
            t_wait_percent: wait_pct(s.d_io_time),
            ms,
        }
    }
}

/// Per-device disk throughput plus the machine total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisksIo {
    pub devices: Vec<DiskIoSnapshot>,
    pub total: DiskIoSnapshot,
}

pub fn build_disks(devices: &[EntityRates]) -> DisksIo {
    let mut sums = DiskSums::default();
    let mut ms = 0;
    let mut out = Vec::with_capacity(devices.len());

    for dev in devices {
        let s = DiskSums::from_entity(dev);
        sums.add(&s);
        ms = ms.max(dev.rates.elapsed_ms);
        out.push(DiskIoSnapshot::from_sums(
            dev.entity.name.clone(),
            &s,
            dev.rates.elapsed_ms,
        ));
    }

    DisksIo {
        devices: out,
        total: DiskIoSnapshot::from_sums("total".to_string(), &sums, ms),
    }
}

// ============ Filesystem ============

/// Filesystem read/write totals and rates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FsStatsSnapshot {
    /// Bytes read since boot.
    pub rx: u64,
    pub wx: u64,
    pub tx: u64,
    pub rx_sec: f64,
    pub wx_sec: f64,
    pub tx_sec: f64,
    pub ms: u64,
}

pub fn build_fs(fs: &EntityRates) -> FsStatsSnapshot {
    let rx = counter(&fs.counters, "bytes_read");
    let wx = counter(&fs.counters, "bytes_written");
    let ms = fs.rates.elapsed_ms;
    let rx_sec = per_second(fs.rates.delta("bytes_read"), ms);
    let wx_sec = per_second(fs.rates.delta("bytes_written"), ms);

    FsStatsSnapshot {
        rx,
        wx,
        tx: rx + wx,
        rx_sec,
        wx_sec,
        tx_sec: rx_sec + wx_sec,
        ms,
    }
}

// ============ CPU speed ============

/// Current clock speeds in GHz.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuSpeed {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub cores: Vec<f64>,
}

/// Converts per-core MHz readings to GHz with two decimals.
pub fn build_speed(mhz: &[f64]) -> CpuSpeed {
    let cores: Vec<f64> = mhz.iter().map(|m| round2(m / 1000.0)).collect();
    if cores.is_empty() {
        return CpuSpeed::default();
    }

    let min = cores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = cores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = round2(cores.iter().sum::<f64>() / cores.len() as f64);

    CpuSpeed {
        min,
        max,
        avg,
        cores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{RateLimits, step};
    use crate::sample::{EntityId, RawSample};

    /// Rates between two readings of the same entity.
    fn diffed(before: RawSample, after: RawSample) -> EntityRates {
        let limits = RateLimits::default();
        let first = step(None, &before, &limits);
        let second = step(first.entry.as_ref(), &after, &limits);
        EntityRates {
            entity: after.entity.clone(),
            counters: after.counters.clone(),
            rates: second.snapshot,
        }
    }

    fn core(id: u32, ms: u64, user: u64, system: u64, idle: u64) -> RawSample {
        RawSample::new(EntityId::cpu(id), ms)
            .with_counter("user", user)
            .with_counter("nice", 0)
            .with_counter("system", system)
            .with_counter("idle", idle)
            .with_counter("irq", 0)
            .with_counter("steal", 0)
            .with_counter("guest", 0)
    }

    #[test]
    fn single_core_half_busy() {
        let cores = vec![diffed(core(0, 0, 100, 0, 900), core(0, 1000, 150, 0, 950))];
        let load = build_load(&cores, None);

        assert_eq!(load.raw_current_load_user, 50);
        assert_eq!(load.raw_current_load_idle, 50);
        assert!((load.current_load - 50.0).abs() < 1e-9);
        assert_eq!(load.cpus.len(), 1);
        assert!((load.cpus[0].load - 50.0).abs() < 1e-9);
        assert_eq!(load.ms, 1000);
    }

    #[test]
    fn overall_load_weights_by_ticks() {
        // core 0: 90 busy of 100 ticks; core 1: 10 busy of 300 ticks
        let cores = vec![
            diffed(core(0, 0, 0, 0, 0), core(0, 1000, 60, 30, 10)),
            diffed(core(1, 0, 0, 0, 0), core(1, 1000, 5, 5, 290)),
        ];
        let load = build_load(&cores, Some(1.0));

        let busy: u64 = load.cpus.iter().map(|c| c.raw_load).sum();
        let ticks: u64 = load.cpus.iter().map(|c| c.raw_ticks()).sum();
        assert!((load.current_load - busy as f64 * 100.0 / ticks as f64).abs() < 1e-9);
        assert!((load.current_load - 25.0).abs() < 1e-9);

        // not the mean of the per-core loads
        let mean = load.cpus.iter().map(|c| c.load).sum::<f64>() / 2.0;
        assert!((load.current_load - mean).abs() > 1.0);
        assert!((load.avg_load - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cold_start_load_is_zero() {
        let sample = core(3, 0, 100, 100, 100);
        let limits = RateLimits::default();
        let rates = step(None, &sample, &limits).snapshot;
        let load = build_load(
            &[EntityRates {
                entity: sample.entity.clone(),
                counters: sample.counters.clone(),
                rates,
            }],
            None,
        );
        assert_eq!(load.current_load, 0.0);
        assert_eq!(load.cpus[0].core, 3);
        assert_eq!(load.cpus[0].load, 0.0);
    }

    fn disk(name: &str, ms: u64, reads: u64, sectors: u64, io_ms: u64) -> RawSample {
        RawSample::new(EntityId::disk(name), ms)
            .with_counter("reads", reads)
            .with_counter("writes", 0)
            .with_counter("sectors_read", sectors)
            .with_counter("sectors_written", 0)
            .with_counter("read_time_ms", io_ms)
            .with_counter("write_time_ms", 0)
            .with_counter("io_time_ms", io_ms)
    }

    #[test]
    fn disk_totals_use_summed_deltas_and_longest_window() {
        let devices = vec![
            diffed(disk("sda", 0, 0, 0, 0), disk("sda", 1000, 100, 2000, 500)),
            diffed(disk("sdb", 0, 0, 0, 0), disk("sdb", 2000, 100, 2000, 0)),
        ];
        let io = build_disks(&devices);

        assert_eq!(io.devices.len(), 2);
        assert!((io.devices[0].r_io_sec - 100.0).abs() < 1e-9);
        assert!((io.devices[0].rx_sec - 2000.0 * 512.0).abs() < 1e-9);
        assert!((io.devices[0].t_wait_percent - 50.0).abs() < 1e-9);
        assert!((io.devices[1].r_io_sec - 50.0).abs() < 1e-9);

        assert_eq!(io.total.name, "total");
        assert_eq!(io.total.ms, 2000);
        assert_eq!(io.total.r_io, 200);
        assert!((io.total.r_io_sec - 100.0).abs() < 1e-9);
        assert!((io.total.tx_sec - io.total.rx_sec).abs() < 1e-9);
    }

    #[test]
    fn fs_stats_from_aggregate() {
        let fs = diffed(
            RawSample::new(EntityId::fs_aggregate(), 0)
                .with_counter("bytes_read", 1000)
                .with_counter("bytes_written", 0),
            RawSample::new(EntityId::fs_aggregate(), 500)
                .with_counter("bytes_read", 2000)
                .with_counter("bytes_written", 500),
        );
        let stats = build_fs(&fs);

        assert_eq!(stats.rx, 2000);
        assert_eq!(stats.tx, 2500);
        assert!((stats.rx_sec - 2000.0).abs() < 1e-9);
        assert!((stats.wx_sec - 1000.0).abs() < 1e-9);
        assert!((stats.tx_sec - 3000.0).abs() < 1e-9);
        assert_eq!(stats.ms, 500);
    }

    #[test]
    fn speed_in_ghz() {
        let speed = build_speed(&[2400.0, 2600.0, 3000.0, 3200.0]);
        assert_eq!(speed.cores, vec![2.4, 2.6, 3.0, 3.2]);
        assert_eq!(speed.min, 2.4);
        assert_eq!(speed.max, 3.2);
        assert_eq!(speed.avg, 2.8);
        assert_eq!(build_speed(&[]), CpuSpeed::default());
    }
}
