// src/cache/ttl_cache.rs

// In-memory LRU cache with per-entry expiry
use lru::LruCache;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::config::CacheConfig;

/// Entry in the cache
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Bounded key/value cache with true LRU eviction and a fixed TTL.
///
/// Reads promote an entry; expired entries read as absent and are removed
/// on access. `len` counts expired entries that have not been touched yet.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq,
{
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// A capacity of zero is treated as one
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: config.ttl,
        }
    }

    // A panic while holding the lock cannot leave the map half-updated
    fn entries(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries();

        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.pop(key);
            return None;
        }

        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or replace `key`, evicting the least recently used entry when full
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };

        let mut entries = self.entries();
        let replacing = entries.contains(&key);
        if let Some((_, old)) = entries.push(key, entry) {
            if !replacing {
                trace!(expired = old.is_expired(Instant::now()), "Cache entry evicted");
            }
        }
    }

    /// Presence check that honours expiry but does not promote
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();

        match entries.peek(key).map(|entry| entry.is_expired(now)) {
            Some(false) => true,
            Some(true) => {
                entries.pop(key);
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &K) -> bool {
        self.entries().pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();

        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key)
            .cloned()
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Return the cached value or run `load` and cache its success.
    ///
    /// Concurrent misses for the same key may both run the loader; the last
    /// writer wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = load().await?;
        self.set(key, value.clone());
        Ok(value)
    }
}
