//! In-memory LRU verdict cache with per-entry TTL.
//! Key: `mediaType:url`. Capacity: 500, TTL: 5 minutes.
//! Expiry is lazy: `has`/`get` delete a stale entry when they meet it,
//! there is no background sweep.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 500;
pub const DEFAULT_TTL: Duration = Duration::from_millis(300_000);

struct CacheEntry<V> {
    value: V,
    expiry: Instant,
}

pub struct ExpiringCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> ExpiringCache<K, V> {
    /// A zero capacity is clamped to one entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// True if a live entry exists. Does not change recency.
    pub fn has(&self, key: &K) -> bool {
        let mut cache = self.inner.lock();
        Self::evict_if_expired(&mut cache, key);
        cache.contains(key)
    }

    /// Look up a live entry and promote it to most-recently-used.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock();
        Self::evict_if_expired(&mut cache, key);
        cache.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or replace. Replacing refreshes both recency and TTL; a new key
    /// at capacity evicts the least-recently-used entry first.
    pub fn set(&self, key: K, value: V) {
        let mut cache = self.inner.lock();
        let entry = CacheEntry {
            value,
            expiry: Instant::now() + self.ttl,
        };
        if let Some((_, evicted)) = cache.push(key, entry) {
            trace!(expired = Instant::now() > evicted.expiry, "cache_entry_displaced");
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of stored entries, expired ones included until touched.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    fn evict_if_expired(cache: &mut LruCache<K, CacheEntry<V>>, key: &K) {
        let expired = cache
            .peek(key)
            .is_some_and(|entry| Instant::now() > entry.expiry);
        if expired {
            cache.pop(key);
            trace!("cache_entry_expired");
        }
    }
}
