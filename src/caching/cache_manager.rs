//! # Distributed Cache
//!
//! The facade application code calls. It composes the [`ConnectionPool`], the
//! [`HealthMonitor`] and the [`LocalFallbackStore`] into degrade-on-failure semantics:
//!
//! - **Reads** go to the distributed store while it is believed available. Any transport
//!   or parse failure falls through to the fallback tier; an unavailable store is skipped
//!   entirely.
//! - **Writes** land in the fallback tier first, unconditionally, so they are observable
//!   mid-outage. The remote write is then attempted and its failure logged and swallowed.
//!   A failed remote write is not replayed later; the tiers may diverge until the key is
//!   rewritten or expires.
//! - **Deletes** hit both tiers. The local removal count is the authoritative result.
//!
//! Availability is latched: once any pool slot exhausts its reconnect attempts and
//! reports `closed`, the whole store is treated as unavailable, even while other slots
//! stay connected. The latch clears on the next `connected` event or when
//! [`DistributedCache::health_check`] succeeds. Until then every call is served by the
//! fallback tier alone.
//!
//! Keys are namespaced before they reach the remote store; the fallback tier uses the
//! caller's key as given. Only misuse (bad key, TTL or pattern, unserializable value)
//! produces an error; an outage never does.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection_pool::{ConnectionPool, ConnectionState};
use super::health::{HealthMonitor, HealthReport};
use super::key_pattern::KeyPattern;
use super::stores::memory::FallbackStoreStats;
use super::stores::{self, LocalFallbackStore, RedisConnector, StoreConnector};
use crate::core::config::CacheConfig;
use crate::core::error::{CacheError, CacheResult};
use crate::observability::metrics::{self, CacheGauges, MetricsSampler};

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Reads answered with a value, from either tier
    pub hits: u64,

    /// Reads answered with nothing
    pub misses: u64,

    /// Reads served by the fallback tier
    pub fallback_reads: u64,

    /// Remote failures absorbed by the facade
    pub remote_errors: u64,

    /// Fallback tier statistics
    pub fallback: FallbackStoreStats,

    /// Availability of the distributed store
    pub health: HealthReport,

    /// State of every pooled connection
    pub pool: Vec<ConnectionState>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fallback_reads: AtomicU64,
    remote_errors: AtomicU64,
}

/// Multi-tier cache with transparent degradation to a local fallback store
pub struct DistributedCache {
    namespace: String,
    max_key_length: usize,
    scan_batch_size: usize,
    pool: Arc<ConnectionPool>,
    health: Arc<HealthMonitor>,
    fallback: Arc<LocalFallbackStore>,
    counters: Counters,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DistributedCache {
    /// Create a cache backed by Redis at `config.store.url`
    pub async fn connect(config: CacheConfig) -> CacheResult<Self> {
        let connector = RedisConnector::new(&config.store)?;
        Self::new(config, &connector).await
    }

    /// Create a cache whose pool connections come from `connector`.
    ///
    /// Connections are opened eagerly. An unreachable store is not an error: the cache
    /// starts in degraded mode and recovers when a connection reports `connected`.
    pub async fn new(config: CacheConfig, connector: &dyn StoreConnector) -> CacheResult<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let health = Arc::new(HealthMonitor::new(&config.health));
        let pool = Arc::new(
            ConnectionPool::new(config.store.pool_size, connector, Arc::clone(&health), shutdown.clone()).await?,
        );
        let fallback = Arc::new(LocalFallbackStore::new());

        let mut tasks = vec![fallback.spawn_sweeper(config.fallback.sweep_interval, shutdown.clone())];

        if config.metrics.enabled {
            let (fallback, health, pool) = (Arc::clone(&fallback), Arc::clone(&health), Arc::clone(&pool));
            tasks.push(MetricsSampler::spawn(
                config.metrics.sample_interval,
                shutdown.clone(),
                move || CacheGauges {
                    fallback_entries: fallback.len(),
                    remote_available: health.snapshot().available,
                    connected_slots: pool.connected_count(),
                },
            ));
        }

        info!(
            namespace = %config.store.namespace,
            pool_size = config.store.pool_size,
            available = health.snapshot().available,
            "Distributed cache initialized"
        );

        Ok(Self {
            namespace: config.store.namespace,
            max_key_length: config.store.max_key_length,
            scan_batch_size: config.store.scan_batch_size,
            pool,
            health,
            fallback,
            counters: Counters::default(),
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    /// Read and deserialize `key`; `None` on a miss or an unreadable value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.validate_key(key)?;

        if self.remote_available().await {
            let remote_key = self.namespaced(key);
            match self.pool.acquire().get(&remote_key).await {
                Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                    Ok(value) => {
                        self.record_hit("remote");
                        debug!(key, "Cache hit in distributed store");
                        return Ok(Some(value));
                    }
                    Err(e) => {
                        warn!(key, error = %e, "Malformed JSON in distributed store, trying fallback");
                    }
                },
                Ok(None) => {
                    self.record_miss();
                    debug!(key, "Cache miss in distributed store");
                    return Ok(None);
                }
                Err(e) => {
                    self.record_remote_error("get");
                    warn!(key, error = %e, "Distributed store read failed, trying fallback");
                }
            }
        }

        Ok(self.read_fallback(key))
    }

    /// Serialize and store `value` under `key`, optionally expiring after `ttl`.
    ///
    /// The local write always happens; the remote write is best-effort.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        self.validate_key(key)?;
        validate_ttl(ttl)?;
        let json = serde_json::to_string(value)?;

        self.fallback.set(key, json.clone(), ttl);

        if self.remote_available().await {
            let remote_key = self.namespaced(key);
            if let Err(e) = self.pool.acquire().set(&remote_key, &json, ttl).await {
                self.record_remote_error("set");
                warn!(key, error = %e, "Distributed store write failed; value kept in local fallback");
            }
        }

        debug!(key, ttl_ms = ttl.map(|ttl| ttl.as_millis() as u64), "Cached value");
        Ok(())
    }

    /// Remove `key` from both tiers; returns the local removal count (0 or 1)
    pub async fn delete(&self, key: &str) -> CacheResult<u64> {
        self.validate_key(key)?;

        let removed = u64::from(self.fallback.delete(key));

        if self.remote_available().await {
            let remote_key = self.namespaced(key);
            if let Err(e) = self.pool.acquire().unlink(&[remote_key]).await {
                self.record_remote_error("delete");
                warn!(key, error = %e, "Distributed store delete failed");
            }
        }

        Ok(removed)
    }

    /// Remove every key matching `pattern` (`*` = any run) from both tiers.
    ///
    /// The remote keyspace is walked in SCAN pages of `scan_batch_size` and each page is
    /// unlinked as it arrives. A failed page is logged and skipped; the returned total
    /// counts only confirmed removals across both tiers.
    pub async fn delete_by_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let pattern = KeyPattern::parse(pattern)?;

        let local = self.fallback.delete_matching(&pattern) as u64;
        let remote = if self.remote_available().await {
            self.delete_remote_matching(&pattern).await
        } else {
            0
        };

        info!(pattern = pattern.as_str(), local, remote, "Deleted keys by pattern");
        Ok(local + remote)
    }

    async fn delete_remote_matching(&self, pattern: &KeyPattern) -> u64 {
        let glob = pattern.store_glob(&self.namespace);
        let connection = self.pool.acquire();
        let mut cursor = 0;
        let mut removed = 0;
        let mut batch = 0usize;

        loop {
            let (next, keys) = match connection.scan(cursor, &glob, self.scan_batch_size).await {
                Ok(page) => page,
                Err(e) => {
                    // the cursor is lost with the failed page, so the walk cannot continue
                    self.record_remote_error("scan");
                    warn!(pattern = pattern.as_str(), batch, error = %e, "Keyspace scan failed, stopping");
                    break;
                }
            };
            batch += 1;

            if !keys.is_empty() {
                match connection.unlink(&keys).await {
                    Ok(count) => removed += count,
                    Err(e) => {
                        self.record_remote_error("unlink");
                        warn!(pattern = pattern.as_str(), batch, keys = keys.len(), error = %e, "Batch delete failed, continuing");
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        removed
    }

    /// Probe the distributed store now, ignoring the throttle window
    pub async fn health_check(&self) -> bool {
        let connection = self.pool.acquire();
        self.health.force_check(|| async move { connection.ping().await }).await
    }

    /// Whether the distributed store is currently believed reachable (no I/O)
    pub fn is_remote_available(&self) -> bool {
        self.health.snapshot().available
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fallback_reads: self.counters.fallback_reads.load(Ordering::Relaxed),
            remote_errors: self.counters.remote_errors.load(Ordering::Relaxed),
            fallback: self.fallback.stats(),
            health: self.health.report(),
            pool: self.pool.states(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Stop background tasks (TTL sweep, metrics sampler, reconnect loops) and wait for them
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background cache task ended abnormally");
            }
        }
        info!("Distributed cache shut down");
    }

    async fn remote_available(&self) -> bool {
        self.health
            .is_available(|| {
                let connection = self.pool.acquire();
                async move { connection.ping().await }
            })
            .await
    }

    fn read_fallback<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Some(raw) = self.fallback.get(key) else {
            self.record_miss();
            return None;
        };

        self.counters.fallback_reads.fetch_add(1, Ordering::Relaxed);
        metrics::record_fallback_read();

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.record_hit("fallback");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Malformed JSON in local fallback, treating as miss");
                self.record_miss();
                None
            }
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn validate_key(&self, key: &str) -> CacheResult<()> {
        if key.is_empty() {
            return Err(CacheError::invalid_key("cache key cannot be empty"));
        }
        if key.len() > self.max_key_length {
            return Err(CacheError::invalid_key(format!(
                "cache key length {} exceeds maximum {}",
                key.len(),
                self.max_key_length
            )));
        }
        Ok(())
    }

    fn record_hit(&self, tier: &'static str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_hit(tier);
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_miss();
    }

    fn record_remote_error(&self, op: &'static str) {
        self.counters.remote_errors.fetch_add(1, Ordering::Relaxed);
        self.health.report_failure();
        metrics::record_remote_error(op);
    }
}

impl Drop for DistributedCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn validate_ttl(ttl: Option<Duration>) -> CacheResult<()> {
    ttl.map_or(Ok(()), stores::validate_ttl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::connection_pool::{ConnectionEvent, ConnectionEventSink};
    use crate::caching::stores::StoreConnection;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct SharedStore {
        data: Mutex<BTreeMap<String, String>>,
        failing: AtomicBool,
    }

    impl SharedStore {
        fn check(&self) -> CacheResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(CacheError::unavailable("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    struct SharedConnection(Arc<SharedStore>);

    #[async_trait]
    impl StoreConnection for SharedConnection {
        async fn get(&self, key: &str) -> CacheResult<Option<String>> {
            self.0.check()?;
            Ok(self.0.data.lock().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
            self.0.check()?;
            self.0.data.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn unlink(&self, keys: &[String]) -> CacheResult<u64> {
            self.0.check()?;
            let mut data = self.0.data.lock();
            Ok(keys.iter().filter(|key| data.remove(*key).is_some()).count() as u64)
        }
        async fn scan(&self, _cursor: u64, pattern: &str, _count: usize) -> CacheResult<(u64, Vec<String>)> {
            self.0.check()?;
            let pattern = KeyPattern::parse(pattern)?;
            let keys = self.0.data.lock().keys().filter(|key| pattern.matches(key)).cloned().collect();
            Ok((0, keys))
        }
        async fn ping(&self) -> CacheResult<()> {
            self.0.check()
        }
    }

    struct SharedConnector(Arc<SharedStore>);

    #[async_trait]
    impl StoreConnector for SharedConnector {
        async fn connect(&self, _slot: usize, events: ConnectionEventSink) -> Arc<dyn StoreConnection> {
            if self.0.check().is_ok() {
                events.emit(ConnectionEvent::Connected);
            } else {
                events.emit(ConnectionEvent::Error);
            }
            Arc::new(SharedConnection(Arc::clone(&self.0)))
        }
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    async fn cache() -> (DistributedCache, Arc<SharedStore>) {
        let store = Arc::new(SharedStore::default());
        let mut config = CacheConfig::default();
        config.metrics.enabled = false;
        let cache = DistributedCache::new(config, &SharedConnector(Arc::clone(&store))).await.unwrap();
        (cache, store)
    }

    #[tokio::test]
    async fn test_remote_keys_are_namespaced() {
        let (cache, store) = cache().await;
        let profile = Profile { name: "ada".to_string(), visits: 3 };

        cache.set_json("user:1", &profile, None).await.unwrap();

        assert!(store.data.lock().contains_key("app:user:1"));
        assert_eq!(cache.get_json::<Profile>("user:1").await.unwrap(), Some(profile));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_remote_miss_is_authoritative() {
        let (cache, store) = cache().await;
        cache.set_json("user:1", &1u32, None).await.unwrap();
        store.data.lock().clear();

        assert_eq!(cache.get_json::<u32>("user:1").await.unwrap(), None);
        assert_eq!(cache.stats().fallback_reads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_degrades_to_fallback() {
        let (cache, store) = cache().await;
        cache.set_json("user:1", &7u32, None).await.unwrap();
        store.failing.store(true, Ordering::SeqCst);

        assert_eq!(cache.get_json::<u32>("user:1").await.unwrap(), Some(7));
        assert!(!cache.is_remote_available());

        let stats = cache.stats();
        assert_eq!(stats.remote_errors, 1);
        assert_eq!(stats.fallback_reads, 1);
    }

    #[tokio::test]
    async fn test_malformed_remote_value_falls_back() {
        let (cache, store) = cache().await;
        cache.set_json("user:1", &7u32, None).await.unwrap();
        store.data.lock().insert("app:user:1".to_string(), "{not json".to_string());

        assert_eq!(cache.get_json::<u32>("user:1").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_misuse_is_rejected() {
        let (cache, _) = cache().await;

        assert!(matches!(cache.get_json::<u32>("").await, Err(CacheError::InvalidKey { .. })));
        let long_key = "k".repeat(251);
        assert!(matches!(cache.delete(&long_key).await, Err(CacheError::InvalidKey { .. })));
        assert!(matches!(
            cache.set_json("k", &1u32, Some(Duration::ZERO)).await,
            Err(CacheError::InvalidTtl { .. })
        ));
        assert!(matches!(
            cache.set_json("k", &1u32, Some(Duration::MAX)).await,
            Err(CacheError::InvalidTtl { .. })
        ));
        assert!(cache.set_json("k", &1u32, Some(stores::MAX_TTL)).await.is_ok());
        assert!(matches!(cache.delete_by_pattern("").await, Err(CacheError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (cache, store) = cache().await;
        cache.set_json("k", &1u32, None).await.unwrap();

        assert_eq!(cache.delete("k").await.unwrap(), 1);
        assert_eq!(cache.delete("k").await.unwrap(), 0);
        assert!(store.data.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_pattern_counts_both_tiers() {
        let (cache, store) = cache().await;
        for key in ["user:1", "user:2", "order:1"] {
            cache.set_json(key, &key, None).await.unwrap();
        }

        assert_eq!(cache.delete_by_pattern("user:*").await.unwrap(), 4);
        assert_eq!(store.data.lock().keys().cloned().collect::<Vec<_>>(), vec!["app:order:1"]);
        assert_eq!(cache.get_json::<String>("order:1").await.unwrap().as_deref(), Some("order:1"));
    }

    #[tokio::test]
    async fn test_health_check_probes_immediately() {
        let (cache, store) = cache().await;
        assert!(cache.health_check().await);

        store.failing.store(true, Ordering::SeqCst);
        assert!(!cache.health_check().await);
        assert!(!cache.is_remote_available());
        assert_eq!(cache.stats().health.probes, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_background_tasks() {
        let (cache, _) = cache().await;
        cache.shutdown().await;
        assert!(cache.tasks.lock().is_empty());
    }
}
