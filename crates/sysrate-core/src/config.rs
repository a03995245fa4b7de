//! Sampler configuration.

use std::time::Duration;

use crate::rates::{MIN_INTERVAL_MS, RateLimits};

/// Tunables shared by every query of a [`Sampler`](crate::sampler::Sampler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    /// Minimum spacing between samples that produce new rates.
    pub min_interval: Duration,
    /// Gap above which an entity is re-baselined instead of averaged.
    pub max_interval: Option<Duration>,
    /// Default timeout for a collector round-trip. Per-query timeouts win.
    pub collect_timeout: Option<Duration>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(MIN_INTERVAL_MS),
            max_interval: None,
            collect_timeout: None,
        }
    }
}

impl SamplerConfig {
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = Some(timeout);
        self
    }

    /// Interval bounds handed to the rate calculator.
    pub fn limits(&self) -> RateLimits {
        RateLimits {
            min_interval_ms: self.min_interval.as_millis() as u64,
            max_interval_ms: self.max_interval.map(|d| d.as_millis() as u64),
        }
    }
}
