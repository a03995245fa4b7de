//! Keyed cache of the last accepted sample and rates per entity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace, warn};

use crate::rates::{RateLimits, StepKind, step};
use crate::sample::{
    CachedEntry, Counters, EntityClass, EntityId, EntityRates, RateSnapshot, RawSample,
};

/// Outcome of observing one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub entity: EntityId,
    pub kind: StepKind,
    /// Counters of the cached sample after the observation; for a throttled
    /// call these are the older, still-cached readings.
    pub counters: Counters,
    pub snapshot: RateSnapshot,
}

impl Observation {
    pub fn into_rates(self) -> EntityRates {
        EntityRates {
            entity: self.entity,
            counters: self.counters,
            rates: self.snapshot,
        }
    }
}

/// Concurrency-safe store of [`CachedEntry`] records.
///
/// A single coarse lock guards the map: entity sets are small and
/// [`observe_batch`](Self::observe_batch) needs get, compute and put of a
/// whole query to be one atomic step. Entries are never evicted.
#[derive(Debug, Default)]
pub struct SampleStore {
    entries: Mutex<HashMap<EntityId, CachedEntry>>,
    resets: AtomicU64,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, CachedEntry>> {
        // The map holds plain data; a panicking holder cannot leave it torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the cached entry for `id`.
    pub fn get(&self, id: &EntityId) -> Option<CachedEntry> {
        self.lock().get(id).cloned()
    }

    /// Replaces the cached entry for `id`.
    pub fn put(&self, id: EntityId, entry: CachedEntry) {
        self.lock().insert(id, entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of counter regressions seen since the store was created.
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    /// Observes a single sample. See [`observe_batch`](Self::observe_batch).
    pub fn observe(&self, sample: RawSample, limits: &RateLimits) -> Observation {
        let mut entries = self.lock();
        self.apply(&mut entries, sample, limits)
    }

    /// Diffs every sample against its cached entry and stores the results,
    /// holding the lock for the whole batch.
    pub fn observe_batch(&self, samples: Vec<RawSample>, limits: &RateLimits) -> Vec<Observation> {
        let mut entries = self.lock();
        samples
            .into_iter()
            .map(|sample| self.apply(&mut entries, sample, limits))
            .collect()
    }

    /// Last rates of every cached entity of `class`, ordered by entity name
    /// (numeric names numerically).
    pub fn cached_rates(&self, class: EntityClass) -> Vec<EntityRates> {
        let mut rates: Vec<EntityRates> = self
            .lock()
            .iter()
            .filter(|(id, _)| id.class == class)
            .map(|(id, entry)| EntityRates {
                entity: id.clone(),
                counters: entry.last_sample.counters.clone(),
                rates: entry.last_rates.clone(),
            })
            .collect();
        rates.sort_by(|a, b| a.entity.sort_key().cmp(&b.entity.sort_key()));
        rates
    }

    fn apply(
        &self,
        entries: &mut HashMap<EntityId, CachedEntry>,
        sample: RawSample,
        limits: &RateLimits,
    ) -> Observation {
        let entity = sample.entity.clone();
        let result = step(entries.get(&entity), &sample, limits);

        match result.kind {
            StepKind::ColdStart => debug!("{}: first sample, baseline stored", entity),
            StepKind::Throttled => trace!(
                "{}: sampled within {}ms, returning cached rates",
                entity, limits.min_interval_ms
            ),
            StepKind::Stale => debug!(
                "{}: sample at {}ms is older than the cached one, returning cached rates",
                entity, sample.timestamp_ms
            ),
            StepKind::GapReset => debug!("{}: sample gap above cap, re-baselining", entity),
            StepKind::Advanced => trace!(
                "{}: {} counters over {}ms",
                entity,
                result.snapshot.delta_counters.len(),
                result.snapshot.elapsed_ms
            ),
        }

        if !result.snapshot.resets.is_empty() && result.kind == StepKind::Advanced {
            self.resets
                .fetch_add(result.snapshot.resets.len() as u64, Ordering::Relaxed);
            warn!(
                "{}: counter reset detected ({}), delta treated as 0",
                entity,
                result.snapshot.resets.join(", ")
            );
        }

        if let Some(entry) = result.entry {
            entries.insert(entity.clone(), entry);
        }
        let counters = entries
            .get(&entity)
            .map(|e| e.last_sample.counters.clone())
            .unwrap_or_default();

        Observation {
            entity,
            kind: result.kind,
            counters,
            snapshot: result.snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn cpu(core: u32, ts: u64, user: u64, idle: u64) -> RawSample {
        RawSample::new(EntityId::cpu(core), ts)
            .with_counter("user", user)
            .with_counter("idle", idle)
    }

    #[test]
    fn cold_start_caches_entity() {
        let store = SampleStore::new();
        assert!(store.get(&EntityId::cpu(0)).is_none());

        let obs = store.observe(cpu(0, 0, 100, 900), &RateLimits::default());
        assert_eq!(obs.kind, StepKind::ColdStart);
        assert!(obs.snapshot.rates_per_second.values().all(|&r| r == 0.0));
        assert_eq!(store.len(), 1);
        assert!(store.get(&EntityId::cpu(0)).is_some());
    }

    #[test]
    fn get_put_roundtrip() {
        let store = SampleStore::new();
        let sample = cpu(1, 10, 1, 2);
        let entry = CachedEntry {
            last_rates: RateSnapshot::zero(&sample),
            last_sample: sample,
        };
        store.put(EntityId::cpu(1), entry.clone());
        assert_eq!(store.get(&EntityId::cpu(1)), Some(entry));
        assert!(!store.is_empty());
    }

    #[test]
    fn reset_is_counted_and_rebaselined() {
        let store = SampleStore::new();
        let limits = RateLimits::default();
        store.observe(cpu(0, 0, 100, 900), &limits);
        let obs = store.observe(cpu(0, 1000, 10, 1000), &limits);

        assert_eq!(obs.snapshot.delta("user"), 0);
        assert_eq!(store.reset_count(), 1);
        let cached = store.get(&EntityId::cpu(0)).unwrap();
        assert_eq!(cached.last_sample.counter("user"), Some(10));
    }

    #[test]
    fn throttled_observation_leaves_cache_untouched() {
        let store = SampleStore::new();
        let limits = RateLimits::default();
        store.observe(cpu(0, 0, 100, 900), &limits);
        let before = store.get(&EntityId::cpu(0));
        let obs = store.observe(cpu(0, 100, 500, 900), &limits);
        assert_eq!(store.get(&EntityId::cpu(0)), before);
        assert_eq!(obs.counters.get("user"), Some(&100));
    }

    #[test]
    fn late_older_sample_does_not_rewind_cache() {
        let store = SampleStore::new();
        let limits = RateLimits::default();
        store.observe(cpu(0, 0, 0, 0), &limits);
        let newer = store.observe(cpu(0, 1005, 100, 900), &limits);

        let late = store.observe(cpu(0, 1000, 99, 890), &limits);
        assert_eq!(late.kind, StepKind::Stale);
        assert_eq!(late.snapshot, newer.snapshot);
        assert_eq!(late.counters.get("user"), Some(&100));

        let cached = store.get(&EntityId::cpu(0)).unwrap();
        assert_eq!(cached.last_sample.timestamp_ms, 1005);
        assert_eq!(cached.last_sample.counter("user"), Some(100));
        assert_eq!(store.reset_count(), 0);

        let next = store.observe(cpu(0, 2005, 150, 1850), &limits);
        assert_eq!(next.snapshot.delta("user"), 50);
    }

    #[test]
    fn cached_rates_sorted_and_filtered() {
        let store = SampleStore::new();
        let limits = RateLimits::default();
        store.observe_batch(
            vec![cpu(10, 0, 1, 1), cpu(2, 0, 1, 1), cpu(0, 0, 1, 1)],
            &limits,
        );
        store.observe(
            RawSample::new(EntityId::disk("sda"), 0).with_counter("reads", 1),
            &limits,
        );

        let cpus = store.cached_rates(EntityClass::Cpu);
        let names: Vec<_> = cpus.iter().map(|r| r.entity.name.as_str()).collect();
        assert_eq!(names, vec!["0", "2", "10"]);
        assert_eq!(store.cached_rates(EntityClass::Disk).len(), 1);
        assert!(store.cached_rates(EntityClass::Fs).is_empty());
    }

    #[test]
    fn concurrent_observers_advance_once() {
        // Eight callers race with the same reading; only one may diff it
        // against the baseline, the rest see it as a repeat poll.
        let store = Arc::new(SampleStore::new());
        let limits = RateLimits::default();
        store.observe(cpu(0, 0, 0, 0), &limits);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.observe(cpu(0, 1000, 100, 0), &limits))
            })
            .collect();

        let observations: Vec<Observation> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let advanced = observations
            .iter()
            .filter(|o| o.kind == StepKind::Advanced)
            .count();
        assert_eq!(advanced, 1);
        assert!(observations.iter().all(|o| o.snapshot.delta("user") == 100));
        let last = store.get(&EntityId::cpu(0)).unwrap();
        assert_eq!(last.last_sample.timestamp_ms, 1000);
    }

    #[test]
    fn out_of_order_racers_count_each_tick_once() {
        // Readings taken at staggered times reach the store in whatever
        // order the threads win the lock. `user` grows with time, so the
        // accepted deltas must add up to the final cached value exactly.
        let store = Arc::new(SampleStore::new());
        let limits = RateLimits::default();
        store.observe(cpu(0, 0, 0, 0), &limits);

        let handles: Vec<_> = (0..16u64)
            .rev()
            .map(|i| {
                let store = Arc::clone(&store);
                let ts = 1000 + i * 150;
                thread::spawn(move || store.observe(cpu(0, ts, ts, 0), &limits))
            })
            .collect();
        let observations: Vec<Observation> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let cached = store.get(&EntityId::cpu(0)).unwrap();
        let counted: u64 = observations
            .iter()
            .filter(|o| o.kind == StepKind::Advanced)
            .map(|o| o.snapshot.delta("user"))
            .sum();
        assert_eq!(counted, cached.last_sample.counter("user").unwrap());
        assert_eq!(cached.last_sample.counter("user"), Some(cached.last_sample.timestamp_ms));
        assert_eq!(store.reset_count(), 0);
        assert!(observations.iter().all(|o| o.kind != StepKind::ColdStart));
    }
}
