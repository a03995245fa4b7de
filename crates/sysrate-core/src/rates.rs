//! Counter-to-rate computation for a single entity.
//!
//! This module is the **single source of truth** for delta and rate math.
//! CPU, disk and filesystem sampling all go through [`step`]; the functions
//! here are pure and the [`SampleStore`](crate::store::SampleStore) applies
//! their result under its lock.

use std::collections::BTreeMap;

use crate::sample::{CachedEntry, RateSnapshot, RawSample};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default minimum spacing (ms) between two samples that produce new rates.
/// Faster polling returns the previous rates unchanged.
pub const MIN_INTERVAL_MS: u64 = 200;

// ---------------------------------------------------------------------------
// Delta helpers
// ---------------------------------------------------------------------------

/// Compute u64 delta, returning `None` on counter regression (reset or wrap).
pub fn du64(curr: u64, prev: u64) -> Option<u64> {
    (curr >= prev).then_some(curr - prev)
}

/// Movement per second over `elapsed_ms`; 0 when no time has passed.
pub fn per_second(delta: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        return 0.0;
    }
    delta as f64 / (elapsed_ms as f64 / 1000.0)
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Interval bounds applied by [`step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Samples closer than this to the cached one are not diffed.
    pub min_interval_ms: u64,
    /// Samples further than this from the cached one re-baseline instead of
    /// averaging over a long gap. `None` disables the cap.
    pub max_interval_ms: Option<u64>,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            min_interval_ms: MIN_INTERVAL_MS,
            max_interval_ms: None,
        }
    }
}

/// How a sample was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// First observation of the entity; zero rates.
    ColdStart,
    /// Within the minimum interval; cached rates returned, cache untouched.
    Throttled,
    /// New rates computed from the cached sample.
    Advanced,
    /// Sample older than the cached one, e.g. from a slower concurrent
    /// caller; cached rates returned, cache untouched.
    Stale,
    /// Gap above `max_interval_ms`; re-baselined with zero rates.
    GapReset,
}

/// Result of [`step`]: the snapshot to hand out and the entry to store.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    pub snapshot: RateSnapshot,
    /// Replacement cache entry; `None` leaves the cache untouched.
    pub entry: Option<CachedEntry>,
}

impl Step {
    fn rebaseline(kind: StepKind, sample: &RawSample) -> Self {
        let snapshot = RateSnapshot::zero(sample);
        Self {
            kind,
            entry: Some(CachedEntry {
                last_sample: sample.clone(),
                last_rates: snapshot.clone(),
            }),
            snapshot,
        }
    }
}

/// Diff `sample` against the cached entry of the same entity.
///
/// Counters that went backwards contribute a zero delta and are listed in
/// [`RateSnapshot::resets`]; the new reading becomes their baseline. Counters
/// absent from the cached sample also start from zero.
pub fn step(prev: Option<&CachedEntry>, sample: &RawSample, limits: &RateLimits) -> Step {
    let Some(prev) = prev else {
        return Step::rebaseline(StepKind::ColdStart, sample);
    };

    let keep = |kind| Step {
        kind,
        snapshot: prev.last_rates.clone(),
        entry: None,
    };

    let prev_ts = prev.last_sample.timestamp_ms;
    let Some(elapsed_ms) = sample.timestamp_ms.checked_sub(prev_ts) else {
        return keep(StepKind::Stale);
    };
    if elapsed_ms < limits.min_interval_ms {
        return keep(StepKind::Throttled);
    }

    if limits.max_interval_ms.is_some_and(|max| elapsed_ms > max) {
        return Step::rebaseline(StepKind::GapReset, sample);
    }

    let mut delta_counters = BTreeMap::new();
    let mut rates_per_second = BTreeMap::new();
    let mut resets = Vec::new();

    for (name, &curr) in &sample.counters {
        let delta = match prev.last_sample.counters.get(name) {
            Some(&old) => du64(curr, old).unwrap_or_else(|| {
                resets.push(name.clone());
                0
            }),
            None => 0,
        };
        delta_counters.insert(name.clone(), delta);
        rates_per_second.insert(name.clone(), per_second(delta, elapsed_ms));
    }

    let snapshot = RateSnapshot {
        delta_counters,
        elapsed_ms,
        rates_per_second,
        resets,
        timestamp_ms: sample.timestamp_ms,
    };

    Step {
        kind: StepKind::Advanced,
        entry: Some(CachedEntry {
            last_sample: sample.clone(),
            last_rates: snapshot.clone(),
        }),
        snapshot,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
