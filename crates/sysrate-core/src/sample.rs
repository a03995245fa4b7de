//! Data model shared by the store, the rate calculator and the aggregator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Family of sampled entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Cpu,
    Disk,
    Fs,
}

impl EntityClass {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityClass::Cpu => "cpu",
            EntityClass::Disk => "disk",
            EntityClass::Fs => "fs",
        }
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of one sampled resource, rendered as `class:name`
/// (`cpu:3`, `disk:sda`, `fs:aggregate`).
///
/// The name must survive across calls for the same physical resource: a
/// device name rather than a hot-plug index, otherwise every call looks like
/// a cold start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub class: EntityClass,
    pub name: String,
}

impl EntityId {
    /// Name used for the single filesystem entity.
    pub const FS_AGGREGATE: &'static str = "aggregate";

    pub fn new(class: EntityClass, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
        }
    }

    pub fn cpu(core: u32) -> Self {
        Self::new(EntityClass::Cpu, core.to_string())
    }

    pub fn disk(device: impl Into<String>) -> Self {
        Self::new(EntityClass::Disk, device)
    }

    pub fn fs_aggregate() -> Self {
        Self::new(EntityClass::Fs, Self::FS_AGGREGATE)
    }

    /// Sort key that orders numeric names numerically (`cpu:2` before `cpu:10`).
    pub(crate) fn sort_key(&self) -> (EntityClass, Option<u64>, &str) {
        (self.class, self.name.parse().ok(), &self.name)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.name)
    }
}

/// Named monotonic counters of one observation, ordered by name.
pub type Counters = BTreeMap<String, u64>;

/// One observation of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub entity: EntityId,
    pub counters: Counters,
    /// Monotonic milliseconds at observation time.
    pub timestamp_ms: u64,
}

impl RawSample {
    pub fn new(entity: EntityId, timestamp_ms: u64) -> Self {
        Self {
            entity,
            counters: Counters::new(),
            timestamp_ms,
        }
    }

    /// Builder-style counter insertion.
    pub fn with_counter(mut self, name: &str, value: u64) -> Self {
        self.counters.insert(name.to_string(), value);
        self
    }

    pub fn set_counter(&mut self, name: &str, value: u64) {
        self.counters.insert(name.to_string(), value);
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }
}

/// Rates computed for one entity between two accepted samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateSnapshot {
    /// Counter name → non-negative movement since the previous sample.
    pub delta_counters: BTreeMap<String, u64>,
    /// Wall-clock time between the two samples; 0 for a baseline.
    pub elapsed_ms: u64,
    /// Counter name → movement per second.
    pub rates_per_second: BTreeMap<String, f64>,
    /// Counters that went backwards in this step and were re-baselined.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resets: Vec<String>,
    /// Timestamp of the sample these rates end at.
    pub timestamp_ms: u64,
}

impl RateSnapshot {
    /// All-zero snapshot covering every counter of `sample`.
    pub fn zero(sample: &RawSample) -> Self {
        Self {
            delta_counters: sample.counters.keys().map(|k| (k.clone(), 0)).collect(),
            elapsed_ms: 0,
            rates_per_second: sample.counters.keys().map(|k| (k.clone(), 0.0)).collect(),
            resets: Vec::new(),
            timestamp_ms: sample.timestamp_ms,
        }
    }

    /// Delta of `name`, 0 when the counter is unknown.
    pub fn delta(&self, name: &str) -> u64 {
        self.delta_counters.get(name).copied().unwrap_or(0)
    }

    /// Per-second rate of `name`, 0 when the counter is unknown.
    pub fn rate(&self, name: &str) -> f64 {
        self.rates_per_second.get(name).copied().unwrap_or(0.0)
    }

    /// Sum of the deltas of the given counters.
    pub fn delta_sum(&self, names: &[&str]) -> u64 {
        names.iter().map(|n| self.delta(n)).sum()
    }

    /// True when no previous sample contributed to this snapshot.
    pub fn is_baseline(&self) -> bool {
        self.elapsed_ms == 0
    }
}

/// Rates of one entity together with the counters they end at.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRates {
    pub entity: EntityId,
    pub counters: Counters,
    pub rates: RateSnapshot,
}

/// What the store keeps per entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub last_sample: RawSample,
    pub last_rates: RateSnapshot,
}
