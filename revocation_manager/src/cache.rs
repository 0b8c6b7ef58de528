use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use lru::LruCache;
use serde_json::Value;

/// Short-lived key/value cache with per-entry TTL. Used for the recovery
/// retry-storm guard (attempt counters keyed by accumulator value) and for
/// caching registry lookups during candidate scans.
pub trait TtlCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value, ttl: Duration);

    fn invalidate(&self, key: &str);
}

/// `lru`-backed `TtlCache`. Capacity-bounded; expired entries are evicted
/// lazily on access.
pub struct InMemoryTtlCache {
    inner: Mutex<LruCache<String, (Value, Instant)>>,
}

impl InMemoryTtlCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        InMemoryTtlCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for InMemoryTtlCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(64).expect("non-zero capacity"))
    }
}

impl TtlCache for InMemoryTtlCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut cache = match self.inner.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        match cache.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                cache.pop(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let mut cache = match self.inner.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.put(key.to_string(), (value, Instant::now() + ttl));
    }

    fn invalidate(&self, key: &str) {
        let mut cache = match self.inner.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.pop(key);
    }
}
