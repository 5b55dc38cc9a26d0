//! TTL response cache with oldest-first eviction

use crate::utils::normalize_input;
use crate::ActorId;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Cache key of an AI reply: the actor plus their normalized input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    actor: ActorId,
    input: String,
}

impl CacheKey {
    /// Build a key from raw user text
    #[must_use]
    pub fn new(actor: ActorId, raw_input: &str) -> Self {
        Self {
            actor,
            input: normalize_input(raw_input),
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups that returned a live entry
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries currently stored, expired ones included until purged
    pub entries: usize,
}

/// Bounded map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct ResponseCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ResponseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache. A zero capacity is treated as one.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, (V, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry; an expired one is deleted and reported absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();
        let (found, expired) = match entries.get(key) {
            Some((value, inserted)) if now.duration_since(*inserted) < self.ttl => {
                (Some(value.clone()), false)
            }
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            entries.remove(key);
        }
        drop(entries);

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert or replace. At capacity the oldest entry is evicted first.
    pub fn set(&self, key: K, value: V) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (_, inserted))| *inserted)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (value, Instant::now()));
    }

    /// Delete every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, inserted)| now.duration_since(*inserted) < self.ttl);
        before - entries.len()
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_secs: u64, capacity: usize) -> ResponseCache<CacheKey, String> {
        ResponseCache::new(Duration::from_secs(ttl_secs), capacity)
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = cache(10, 10);
        let key = CacheKey::new(ActorId(1), "hello");
        cache.set(key.clone(), "hi".into());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get(&key).as_deref(), Some("hi"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_normalized_per_actor() {
        let cache = cache(60, 10);
        cache.set(CacheKey::new(ActorId(1), "Red  Shoes"), "42".into());

        assert!(cache.get(&CacheKey::new(ActorId(1), " red shoes ")).is_some());
        assert!(cache.get(&CacheKey::new(ActorId(2), "red shoes")).is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_evicts_oldest() {
        let cache = cache(60, 2);
        for input in ["a", "b", "c"] {
            cache.set(CacheKey::new(ActorId(1), input), input.to_string());
            tokio::time::advance(Duration::from_millis(5)).await;
        }

        assert!(cache.get(&CacheKey::new(ActorId(1), "a")).is_none());
        assert!(cache.get(&CacheKey::new(ActorId(1), "b")).is_some());
        assert!(cache.get(&CacheKey::new(ActorId(1), "c")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_key_does_not_evict() {
        let cache = cache(60, 2);
        cache.set(CacheKey::new(ActorId(1), "a"), "1".into());
        cache.set(CacheKey::new(ActorId(1), "b"), "2".into());
        cache.set(CacheKey::new(ActorId(1), "a"), "3".into());

        assert_eq!(cache.stats().entries, 2);
        assert_eq!(cache.get(&CacheKey::new(ActorId(1), "a")).as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let cache = cache(10, 10);
        cache.set(CacheKey::new(ActorId(1), "old"), "x".into());
        tokio::time::advance(Duration::from_secs(11)).await;
        cache.set(CacheKey::new(ActorId(1), "new"), "y".into());

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
    }
}
