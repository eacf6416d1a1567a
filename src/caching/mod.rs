//! # Caching System Module
//!
//! A two-tier cache that keeps working when its distributed store does not.
//!
//! ## Features
//! - Distributed store access through a fixed-size round-robin connection pool
//! - Availability tracking with throttled health probes and event-driven fast-fail
//! - Write-through local fallback tier with lazy and periodic TTL expiry
//! - Glob-pattern bulk invalidation across both tiers
//! - Response caching with in-flight deduplication for outbound HTTP calls
//! - A bounded LRU cache for short-lived computed values
//!
//! ## Architecture
//! 1. **Distributed Cache**: the facade; decides per call which tier answers
//! 2. **Connection Pool**: round-robin slots, each with its own connection state
//! 3. **Health Monitor**: the single availability belief shared by the facade and pool
//! 4. **Stores**: the local fallback map and the Redis connection implementation
//! 5. **Request Cache**: sits above the facade and wraps outbound calls
//!
//! ## Usage Example
//! ```rust,no_run
//! use resilient_cache::{CacheConfig, DistributedCache};
//! use std::time::Duration;
//!
//! # async fn example() -> resilient_cache::CacheResult<()> {
//! let cache = DistributedCache::connect(CacheConfig::from_env()?).await?;
//!
//! cache.set_json("user:123:profile", &"profile data", Some(Duration::from_secs(300))).await?;
//! let profile: Option<String> = cache.get_json("user:123:profile").await?;
//!
//! cache.delete_by_pattern("user:123:*").await?;
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache_manager;
pub mod connection_pool;
pub mod deduplication;
pub mod health;
pub mod key_pattern;
pub mod lru;
pub mod stores;

pub use cache_manager::{CacheStats, DistributedCache};
pub use connection_pool::{ConnectionEvent, ConnectionEventSink, ConnectionPool, ConnectionState};
pub use deduplication::{HttpTransport, OutboundRequest, PendingRequest, RequestCacheManager, ReqwestTransport};
pub use health::{HealthMonitor, HealthReport, HealthState};
pub use key_pattern::KeyPattern;
pub use lru::BoundedLruCache;
pub use stores::memory::FallbackStoreStats;
pub use stores::{CacheEntry, LocalFallbackStore, RedisConnection, RedisConnector, StoreConnection, StoreConnector};
