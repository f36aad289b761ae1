//! # Realization cache
//!
//! Memoizes one value per (subject, realization[, year]) key so that a
//! Monte Carlo replicate observes the same draw no matter how often, or in
//! what order, a quantity is requested.
//!
//! Each key owns a slot guarded by its own mutex. The map shard lock is
//! only held while the slot is fetched, so distinct keys never contend and
//! two threads racing on the same key serialize on the slot: the supplier
//! runs at most once per successfully stored key.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Key for quantities tied to a subject within one Monte Carlo replicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealizationKey {
    pub subject_id: String,
    pub realization_id: usize,
    /// Observation year, for quantities that vary by year within a subject.
    pub year: Option<i32>,
}

impl RealizationKey {
    #[must_use]
    pub fn new(subject_id: impl Into<String>, realization_id: usize) -> Self {
        Self {
            subject_id: subject_id.into(),
            realization_id,
            year: None,
        }
    }

    #[must_use]
    pub fn with_year(self, year: i32) -> Self {
        Self {
            year: Some(year),
            ..self
        }
    }
}

type Slot<V> = Arc<Mutex<Option<V>>>;

/// Instance-owned memo table with per-key locking and no eviction.
#[derive(Debug)]
pub struct RealizationCache<K, V>
where
    K: Eq + Hash,
{
    slots: DashMap<K, Slot<V>>,
}

impl<K, V> Default for RealizationCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, V> RealizationCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored value for `key`, invoking `supplier` only when absent.
    ///
    /// # Errors
    ///
    /// Propagates the supplier error; nothing is stored in that case and a
    /// later call retries the computation.
    pub fn get_or_try_compute<E>(
        &self,
        key: &K,
        supplier: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let slot = self.slot(key);
        let mut guard = slot.lock();
        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }
        let value = supplier()?;
        *guard = Some(value.clone());
        Ok(value)
    }

    /// Infallible variant of [`Self::get_or_try_compute`].
    pub fn get_or_compute(&self, key: &K, supplier: impl FnOnce() -> V) -> V {
        let slot = self.slot(key);
        let mut guard = slot.lock();
        guard.get_or_insert_with(supplier).clone()
    }

    /// Stored value for `key`, if any, without computing it.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        let guard = slot.lock();
        guard.clone()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of keys holding a stored value.
    #[must_use]
    pub fn len(&self) -> usize {
        let slots: Vec<Slot<V>> = self
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &K) -> Slot<V> {
        if let Some(entry) = self.slots.get(key) {
            return Arc::clone(entry.value());
        }
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn supplier_runs_once_per_key() {
        let cache = RealizationCache::<RealizationKey, f64>::new();
        let calls = AtomicUsize::new(0);
        let key = RealizationKey::new("plot-1", 3).with_year(2001);
        for _ in 0..5 {
            let value = cache.get_or_compute(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                0.75
            });
            assert_eq!(value, 0.75);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_differ_by_realization_and_year() {
        let cache = RealizationCache::<RealizationKey, usize>::new();
        let base = RealizationKey::new("tree-9", 0);
        cache.get_or_compute(&base, || 1);
        cache.get_or_compute(&RealizationKey::new("tree-9", 1), || 2);
        cache.get_or_compute(&base.clone().with_year(1999), || 3);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&base), Some(1));
    }

    #[test]
    fn failed_supplier_stores_nothing() {
        let cache = RealizationCache::<usize, f64>::new();
        let result: Result<f64, &str> = cache.get_or_try_compute(&4, || Err("boom"));
        assert_eq!(result, Err("boom"));
        assert!(!cache.contains(&4));
        assert!(cache.is_empty());
        let retried: Result<f64, &str> = cache.get_or_try_compute(&4, || Ok(2.0));
        assert_eq!(retried, Ok(2.0));
    }

    #[test]
    fn concurrent_first_writes_run_supplier_once() {
        let cache = RealizationCache::<RealizationKey, usize>::new();
        let calls = AtomicUsize::new(0);
        let key = RealizationKey::new("shared", 0);
        std::thread::scope(|scope| {
            for thread in 0..8 {
                let cache = &cache;
                let calls = &calls;
                let key = &key;
                scope.spawn(move || {
                    let value = cache.get_or_compute(key, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        thread
                    });
                    assert_eq!(cache.get(key), Some(value));
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
