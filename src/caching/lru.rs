//! # Bounded LRU Cache
//!
//! A size-bounded, TTL-aware cache for short-lived computed values. Unlike the
//! fallback store it has a hard capacity and no relationship with the distributed store.
//!
//! Eviction is strictly by recency: a hit or an overwrite promotes the entry to most
//! recently used, and inserting a new key at capacity evicts the single least recently
//! used entry. Access counts are kept for diagnostics only.
//!
//! Recency is tracked with a monotonically increasing tick per touch, indexed by a
//! `BTreeMap`, so promotion and eviction are both `O(log n)`.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

use super::stores::validate_ttl;
use crate::core::error::{CacheError, CacheResult};

struct LruEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
    access_count: u64,
    tick: u64,
}

impl<V> LruEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

struct LruInner<K, V> {
    entries: HashMap<K, LruEntry<V>>,
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Hash + Eq + Clone, V> LruInner<K, V> {
    fn touch(&mut self, key: &K) -> Option<&mut LruEntry<V>> {
        let tick = self.next_tick;
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        entry.tick = tick;
        self.order.insert(tick, key.clone());
        self.next_tick += 1;
        Some(entry)
    }

    fn remove(&mut self, key: &K) -> Option<LruEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Size-bounded, TTL-aware, recency-evicting cache
pub struct BoundedLruCache<K, V> {
    inner: Mutex<LruInner<K, V>>,
    max_size: usize,
    ttl: Duration,
}

impl<K, V> BoundedLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `max_size` entries, each living for `ttl`
    pub fn new(max_size: usize, ttl: Duration) -> CacheResult<Self> {
        if max_size == 0 {
            return Err(CacheError::config("LRU cache max_size must be at least 1"));
        }
        validate_ttl(ttl)?;

        Ok(Self {
            inner: Mutex::new(LruInner {
                entries: HashMap::with_capacity(max_size),
                order: BTreeMap::new(),
                next_tick: 0,
            }),
            max_size,
            ttl,
        })
    }

    /// Get a live value and promote it to most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = inner.entries.get(key)?.is_expired(now);
        if expired {
            inner.remove(key);
            return None;
        }

        let entry = inner.touch(key)?;
        entry.access_count += 1;
        Some(entry.value.clone())
    }

    /// Insert or overwrite `key` with the cache-wide TTL
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Insert or overwrite `key` with its own TTL.
    ///
    /// Overwriting replaces the value and timestamp and promotes the entry without
    /// consuming extra capacity. Inserting a new key at capacity evicts the least
    /// recently used entry first.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if let Some(entry) = inner.touch(&key) {
            entry.value = value;
            entry.stored_at = now;
            entry.ttl = ttl;
            return;
        }

        if inner.entries.len() >= self.max_size {
            inner.evict_oldest();
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            LruEntry {
                value,
                stored_at: now,
                ttl,
                access_count: 0,
                tick,
            },
        );
    }

    /// Remove `key`, returning its value if it was present and live
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let entry = inner.remove(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value)
    }

    /// Number of hits recorded for `key`
    pub fn access_count(&self, key: &K) -> Option<u64> {
        self.inner.lock().entries.get(key).map(|entry| entry.access_count)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> BoundedLruCache<&'static str, u32> {
        BoundedLruCache::new(max_size, Duration::from_secs(60)).unwrap()
    }

    #[tokio::test]
    async fn test_evicts_least_recently_inserted() {
        let cache = cache(2);
        cache.set("x", 1);
        cache.set("y", 2);
        cache.set("z", 3);

        assert_eq!(cache.get(&"x"), None);
        assert_eq!(cache.get(&"y"), Some(2));
        assert_eq!(cache.get(&"z"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_hit_promotes_entry() {
        let cache = cache(2);
        cache.set("x", 1);
        cache.set("y", 2);

        assert_eq!(cache.get(&"x"), Some(1));
        cache.set("z", 3);

        assert_eq!(cache.get(&"y"), None);
        assert_eq!(cache.get(&"x"), Some(1));
        assert_eq!(cache.get(&"z"), Some(3));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_consume_capacity() {
        let cache = cache(2);
        cache.set("x", 1);
        cache.set("y", 2);
        cache.set("x", 10);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"x"), Some(10));
        assert_eq!(cache.get(&"y"), Some(2));

        // y was read after x, so x is now the least recently used
        cache.set("z", 3);
        assert_eq!(cache.get(&"x"), None);
        assert_eq!(cache.get(&"y"), Some(2));
    }

    #[tokio::test]
    async fn test_access_count_is_diagnostic_only() {
        let cache = cache(2);
        cache.set("hot", 1);
        cache.set("cold", 2);

        for _ in 0..5 {
            cache.get(&"hot");
        }
        cache.get(&"cold");
        assert_eq!(cache.access_count(&"hot"), Some(5));
        assert_eq!(cache.access_count(&"cold"), Some(1));

        // frequency does not protect "hot": it is the least recently used
        cache.set("new", 3);
        assert_eq!(cache.get(&"hot"), None);
        assert_eq!(cache.get(&"cold"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_on_get() {
        let cache = BoundedLruCache::new(4, Duration::from_secs(10)).unwrap();
        cache.set("k", "v");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get(&"k"), Some("v"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_entry_ttl() {
        let cache = BoundedLruCache::new(4, Duration::from_secs(60)).unwrap();
        cache.set_with_ttl("short", 1, Duration::from_secs(1));
        cache.set("long", 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"short"), None);
        assert_eq!(cache.get(&"long"), Some(2));
    }

    #[test]
    fn test_invalid_construction() {
        assert!(BoundedLruCache::<String, u32>::new(0, Duration::from_secs(1)).is_err());
        assert!(BoundedLruCache::<String, u32>::new(1, Duration::ZERO).is_err());
        assert!(BoundedLruCache::<String, u32>::new(1, Duration::MAX).is_err());
    }
}
