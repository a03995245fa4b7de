//! sysrate-core: counter-to-rate sampling engine.
//!
//! Provides:
//! - `sample`: entity ids, raw counter samples, rate snapshots
//! - `rates`: pure delta/rate computation for one entity
//! - `store`: concurrency-safe cache of the last sample per entity
//! - `aggregate`: CPU load, disk I/O and filesystem summaries
//! - `sampler`: public query functions (`current_load`, `disks_io`, ...)
//! - `collector`: raw counter collectors (Linux procfs, mocks)
//! - `config`, `clock`, `platform`: sampler configuration and environment
//! - `fmt`: formatting helpers for rates and byte counts

pub mod aggregate;
pub mod clock;
pub mod collector;
pub mod config;
pub mod fmt;
pub mod platform;
pub mod rates;
pub mod sample;
pub mod sampler;
pub mod store;

pub use aggregate::{CoreLoad, CpuSpeed, DiskIoSnapshot, DisksIo, FsStatsSnapshot, LoadSnapshot};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use collector::{CollectOptions, CollectionError, CounterCollector};
pub use config::SamplerConfig;
pub use platform::Platform;
pub use sample::{CachedEntry, EntityClass, EntityId, EntityRates, RateSnapshot, RawSample};
pub use sampler::{CancelToken, QueryError, QueryOptions, Sampler};
pub use store::SampleStore;
