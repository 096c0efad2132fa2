use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::interfaces::ExecutionPlan;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CachedPlan {
    plan: Arc<dyn ExecutionPlan>,
    last_used: AtomicU64,
}

/// Bounded plan cache keyed by parameter-stripped query text. The least
/// recently used plan is evicted when the cache is full.
pub struct PlanCache {
    capacity: usize,
    inner: RwLock<AHashMap<String, CachedPlan>>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(AHashMap::new()),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<dyn ExecutionPlan>> {
        let guard = self.inner.read();
        match guard.get(key) {
            Some(entry) => {
                entry.last_used.store(self.next_tick(), Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.plan))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `plan` under `key`. When another thread stored a plan for the same
    /// key first, that plan is kept and returned.
    pub fn store(&self, key: &str, plan: Arc<dyn ExecutionPlan>) -> Arc<dyn ExecutionPlan> {
        let mut guard = self.inner.write();
        if let Some(existing) = guard.get(key) {
            return Arc::clone(&existing.plan);
        }
        if guard.len() >= self.capacity {
            let victim = guard
                .iter()
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                guard.remove(&victim);
            }
        }
        guard.insert(
            key.to_string(),
            CachedPlan {
                plan: Arc::clone(&plan),
                last_used: AtomicU64::new(self.next_tick()),
            },
        );
        plan
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn clear(&self) {
        self.inner.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.inner.read().len();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }
}
