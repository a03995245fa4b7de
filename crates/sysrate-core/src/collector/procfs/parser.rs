//! Parsers for the `/proc` and `/sys` files the procfs collector reads.
//!
//! Every function takes file content as a string so the formats can be
//! tested without a filesystem.

use std::collections::HashSet;
use std::fmt;

/// A file that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// Short name of the source, e.g. `"/proc/stat"`.
    pub file: &'static str,
    pub message: String,
}

impl ParseError {
    pub fn new(file: &'static str, message: impl Into<String>) -> Self {
        Self {
            file,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parses whitespace-separated counters, padding missing trailing columns
/// with zeros up to `N`.
fn counters<const N: usize>(
    file: &'static str,
    label: &str,
    columns: &[&str],
) -> Result<[u64; N], ParseError> {
    let mut out = [0u64; N];
    for (slot, col) in out.iter_mut().zip(columns) {
        *slot = col
            .parse()
            .map_err(|_| ParseError::new(file, format!("{label}: bad counter '{col}'")))?;
    }
    Ok(out)
}

// ============ /proc/stat ============

/// Tick counters of one `cpu` line in `/proc/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTicks {
    /// `None` for the all-cores `cpu` line.
    pub core: Option<u32>,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
}

impl CpuTicks {
    /// Idle time including I/O wait.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    /// Hard and soft interrupt time.
    pub fn irq_total(&self) -> u64 {
        self.irq + self.softirq
    }
}

/// Parses the `cpu` lines of `/proc/stat`, in file order.
///
/// Kernels older than 2.6.11 stop before `steal`; missing columns read as 0.
/// At least `user nice system idle` must be present.
pub fn parse_cpu_stat(content: &str) -> Result<Vec<CpuTicks>, ParseError> {
    const FILE: &str = "/proc/stat";

    let cpus = content
        .lines()
        .filter(|line| line.starts_with("cpu"))
        .map(|line| {
            let mut cols = line.split_whitespace();
            let label = cols.next().unwrap_or_default();
            let core = match &label[3..] {
                "" => None,
                n => Some(
                    n.parse()
                        .map_err(|_| ParseError::new(FILE, format!("bad cpu label '{label}'")))?,
                ),
            };
            let cols: Vec<&str> = cols.collect();
            if cols.len() < 4 {
                return Err(ParseError::new(FILE, format!("{label}: too few columns")));
            }
            let [user, nice, system, idle, iowait, irq, softirq, steal, guest] =
                counters::<9>(FILE, label, &cols)?;
            Ok(CpuTicks {
                core,
                user,
                nice,
                system,
                idle,
                iowait,
                irq,
                softirq,
                steal,
                guest,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if cpus.is_empty() {
        return Err(ParseError::new(FILE, "no cpu lines"));
    }
    Ok(cpus)
}

// ============ /proc/loadavg ============

/// One-minute load average, the first field of `/proc/loadavg`.
pub fn parse_load1(content: &str) -> Result<f64, ParseError> {
    const FILE: &str = "/proc/loadavg";
    let field = content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new(FILE, "empty"))?;
    field
        .parse()
        .map_err(|_| ParseError::new(FILE, format!("bad load value '{field}'")))
}

// ============ /proc/diskstats ============

/// The `/proc/diskstats` columns the disk and filesystem rates use.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskRow {
    pub major: u32,
    pub minor: u32,
    pub name: String,
    pub reads: u64,
    pub sectors_read: u64,
    pub read_ms: u64,
    pub writes: u64,
    pub sectors_written: u64,
    pub write_ms: u64,
    /// Wall time the device had I/O in flight.
    pub io_ms: u64,
}

/// Parses `/proc/diskstats`.
///
/// Columns after the name: reads, reads merged, sectors read, read ms,
/// writes, writes merged, sectors written, write ms, in flight, io ms, ...
/// Rows with fewer than 14 columns are skipped.
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskRow>, ParseError> {
    const FILE: &str = "/proc/diskstats";

    let mut rows = Vec::new();
    for line in content.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 14 {
            continue;
        }
        let id = |idx: usize| -> Result<u32, ParseError> {
            cols[idx]
                .parse()
                .map_err(|_| ParseError::new(FILE, format!("bad device number in '{}'", line.trim())))
        };
        let name = cols[2];
        let [reads, _, sectors_read, read_ms, writes, _, sectors_written, write_ms, _, io_ms] =
            counters::<10>(FILE, name, &cols[3..])?;

        rows.push(DiskRow {
            major: id(0)?,
            minor: id(1)?,
            name: name.to_string(),
            reads,
            sectors_read,
            read_ms,
            writes,
            sectors_written,
            write_ms,
            io_ms,
        });
    }
    Ok(rows)
}

// ============ /proc/self/mountinfo ============

/// `major:minor` ids of mounted block devices.
///
/// The id is the third column of each mountinfo line. Major 0 marks
/// anonymous devices (proc, tmpfs, overlay) and is dropped.
pub fn parse_mountinfo_device_ids(content: &str) -> HashSet<(u32, u32)> {
    content
        .lines()
        .filter_map(|line| {
            let (major, minor) = line.split_whitespace().nth(2)?.split_once(':')?;
            Some((major.parse().ok()?, minor.parse().ok()?))
        })
        .filter(|&(major, _)| major != 0)
        .collect()
}

// ============ CPU frequency ============

/// `cpu MHz` of every processor in `/proc/cpuinfo`, in file order.
///
/// Architectures without the field (most ARM kernels) yield an empty list.
pub fn parse_cpuinfo_mhz(content: &str) -> Vec<f64> {
    content
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim() != "cpu MHz" {
                return None;
            }
            value.trim().parse().ok()
        })
        .collect()
}

/// Parses a sysfs `scaling_cur_freq` file (kHz) into MHz.
pub fn parse_scaling_freq_khz(content: &str) -> Result<f64, ParseError> {
    let value = content.trim();
    value
        .parse::<u64>()
        .map(|khz| khz as f64 / 1000.0)
        .map_err(|_| ParseError::new("scaling_cur_freq", format!("bad frequency '{value}'")))
}
