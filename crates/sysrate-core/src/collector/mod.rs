//! Raw counter collectors.
//!
//! A collector turns an operating-system data source into [`RawSample`]s.
//! It holds no rate state; the sampler diffs successive readings.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     CounterCollector                     │
//! │  ┌──────────────────────┐   ┌──────────────────────────┐ │
//! │  │   ProcfsCollector    │   │    ScriptedCollector     │ │
//! │  │  - /proc/stat        │   │  - queued responses      │ │
//! │  │  - /proc/diskstats   │   │    (tests, replays)      │ │
//! │  │  - /proc/self/mount… │   └──────────────────────────┘ │
//! │  └──────────┬───────────┘                                │
//! │      ┌──────▼──────┐                                     │
//! │      │  FileSystem │ (trait)                             │
//! │      └──────┬──────┘                                     │
//! └─────────────┼────────────────────────────────────────────┘
//!        ┌──────┴───────┐
//!  ┌─────▼─────┐  ┌─────▼─────┐
//!  │  RealFs   │  │  MockFs   │
//!  └───────────┘  └───────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use sysrate_core::collector::{CollectOptions, CounterCollector, MockFs, ProcfsCollector};
//!
//! let collector = ProcfsCollector::new(MockFs::typical_system());
//! let cores = collector.collect_cpu(&CollectOptions::default()).unwrap();
//! assert_eq!(cores.len(), 4);
//! ```

pub mod mock;
pub mod procfs;
pub mod traits;

use std::fmt;
use std::io;
use std::time::Duration;

use crate::sample::{EntityClass, RawSample};

pub use mock::{MockFs, ScriptedCollector};
pub use procfs::ProcfsCollector;
pub use traits::{FileSystem, RealFs};

/// Filter handed to collectors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectOptions {
    /// Device names to keep; empty keeps every device.
    pub devices: Vec<String>,
}

impl CollectOptions {
    /// Whether `device` passes the filter.
    pub fn wants_device(&self, device: &str) -> bool {
        self.devices.is_empty() || self.devices.iter().any(|d| d == device)
    }
}

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectionError {
    /// I/O error reading the data source (includes permission denied).
    Io(io::Error),
    /// Data source content could not be parsed.
    Parse(String),
    /// Data source missing on this host (command, file, sysctl).
    Unavailable(String),
    /// The collector cannot produce this entity class at all.
    Unsupported(EntityClass),
    /// Collection did not finish within the allowed time.
    TimedOut(Duration),
    /// Caller cancelled the query.
    Cancelled,
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::Io(e) => write!(f, "I/O error: {}", e),
            CollectionError::Parse(msg) => write!(f, "parse error: {}", msg),
            CollectionError::Unavailable(what) => write!(f, "{} not available", what),
            CollectionError::Unsupported(class) => {
                write!(f, "{} counters not supported by this collector", class)
            }
            CollectionError::TimedOut(d) => write!(f, "collection timed out after {:?}", d),
            CollectionError::Cancelled => write!(f, "collection cancelled"),
        }
    }
}

impl std::error::Error for CollectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectionError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectionError {
    fn from(e: io::Error) -> Self {
        CollectionError::Io(e)
    }
}

impl From<procfs::ParseError> for CollectionError {
    fn from(e: procfs::ParseError) -> Self {
        CollectionError::Parse(e.to_string())
    }
}

/// Source of raw monotonic counters for one platform.
///
/// Entity names must be stable across calls for the same physical resource.
/// Counters should never decrease between calls except on a genuine reset;
/// the sampler tolerates resets but reports them.
pub trait CounterCollector: Send + Sync {
    /// One sample per CPU core.
    fn collect_cpu(&self, options: &CollectOptions) -> Result<Vec<RawSample>, CollectionError>;

    /// One sample per block device.
    fn collect_disks(&self, options: &CollectOptions) -> Result<Vec<RawSample>, CollectionError>;

    /// Aggregate filesystem read/write byte counters.
    fn collect_filesystem(&self, options: &CollectOptions) -> Result<RawSample, CollectionError>;

    /// One-minute load average.
    fn load_average(&self, _options: &CollectOptions) -> Result<f64, CollectionError> {
        Err(CollectionError::Unavailable("load average".to_string()))
    }

    /// Current clock speed of each core in MHz.
    fn cpu_speeds_mhz(&self, _options: &CollectOptions) -> Result<Vec<f64>, CollectionError> {
        Err(CollectionError::Unavailable("cpu frequency".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_wants_everything() {
        let opts = CollectOptions::default();
        assert!(opts.wants_device("sda"));
        let opts = CollectOptions {
            devices: vec!["nvme0n1".to_string()],
        };
        assert!(opts.wants_device("nvme0n1"));
        assert!(!opts.wants_device("sda"));
    }

    #[test]
    fn io_error_converts() {
        let err: CollectionError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(err, CollectionError::Io(_)));
        assert!(err.to_string().contains("nope"));
    }
}
