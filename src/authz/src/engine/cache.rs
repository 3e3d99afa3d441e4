//! LRU cache of effective permission sets keyed by role combination

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::permissions::{canonical_roles, EffectivePermissionSet};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of role combinations kept
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

struct Inner {
    entries: LruCache<String, Arc<EffectivePermissionSet>>,
    /// Rule snapshot generation the entries were computed against
    generation: u64,
}

/// Permission-set cache
///
/// Entries are tied to the rule snapshot generation they were computed
/// from. Seeing a newer generation drops every entry, and results computed
/// against an older one are never stored.
pub struct DecisionCache {
    inner: Mutex<Inner>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    invalidations: AtomicUsize,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                generation: 0,
            }),
            capacity: capacity.get(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        }
    }

    /// Canonical key for a role list: sorted, deduplicated, length-prefixed
    pub fn key_for<S: AsRef<str>>(roles: &[S]) -> String {
        let mut key = String::new();
        for role in canonical_roles(roles) {
            key.push_str(&role.len().to_string());
            key.push(':');
            key.push_str(role);
        }
        key
    }

    /// Look up a set computed against `generation`
    ///
    /// A lookup for an older generation misses without touching the entries.
    pub fn get(&self, key: &str, generation: u64) -> Option<Arc<EffectivePermissionSet>> {
        let mut inner = self.inner.lock();
        if generation < inner.generation {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if generation > inner.generation {
            self.reset_to(&mut inner, generation);
        }

        match inner.entries.get(key) {
            Some(set) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(set))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a set computed against `generation`
    ///
    /// Racing puts for the same key are benign; last write wins.
    pub fn put(&self, key: String, set: Arc<EffectivePermissionSet>, generation: u64) {
        let mut inner = self.inner.lock();
        if generation < inner.generation {
            return;
        }
        if generation > inner.generation {
            self.reset_to(&mut inner, generation);
        }
        inner.entries.put(key, set);
    }

    fn reset_to(&self, inner: &mut Inner, generation: u64) {
        if !inner.entries.is_empty() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        inner.entries.clear();
        inner.generation = generation;
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
            max_entries: self.capacity,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
