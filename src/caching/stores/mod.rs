//! # Cache Stores Module
//!
//! The local fallback store and the seam to the distributed store.
//!
//! The distributed store is reached only through [`StoreConnection`]: get, set, scan,
//! unlink and ping. [`StoreConnector`] opens one connection per pool slot. The Redis
//! implementation lives in [`redis_store`]; tests substitute in-process doubles.

pub mod memory;
pub mod redis_store;

pub use memory::LocalFallbackStore;
pub use redis_store::{RedisConnection, RedisConnector};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::connection_pool::ConnectionEventSink;
use crate::core::error::{CacheError, CacheResult};

/// Longest TTL accepted by any cache tier (one year)
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Reject TTLs that can never hold a value or that exceed [`MAX_TTL`]
pub fn validate_ttl(ttl: Duration) -> CacheResult<()> {
    if ttl.is_zero() {
        return Err(CacheError::invalid_ttl("ttl must be greater than zero"));
    }
    if ttl > MAX_TTL {
        return Err(CacheError::invalid_ttl(format!(
            "ttl of {}s exceeds the maximum of {}s",
            ttl.as_secs(),
            MAX_TTL.as_secs()
        )));
    }
    Ok(())
}

/// Cache entry with expiry metadata.
///
/// The value is held as serialized JSON text, so every store owns its own copy and
/// nothing is shared by reference across tiers.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached value (JSON text)
    pub value: String,

    /// When the entry was written
    pub stored_at: Instant,

    /// When the entry expires; `None` never expires
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Create a new cache entry; a deadline past the clock's range never expires
    pub fn new(value: String, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            stored_at: now,
            expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
        }
    }

    /// Check if the entry is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a fixed instant
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Time until expiration, `None` for entries that never expire
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| expires_at.saturating_duration_since(Instant::now()))
    }
}

/// One connection to the distributed store.
///
/// Every `Err` is a transport error. Keys arrive already namespaced.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write `value` under `key`, expiring after `ttl` when given
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove `keys` without blocking the store; returns how many existed
    async fn unlink(&self, keys: &[String]) -> CacheResult<u64>;

    /// One page of a cursor-based keyspace walk; a returned cursor of 0 ends the walk
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)>;

    /// Lightweight liveness probe
    async fn ping(&self) -> CacheResult<()>;
}

/// Opens the connection for one pool slot.
///
/// Connecting cannot fail at the type level: a slot whose store is unreachable still
/// yields a handle, which reports its state through `events` and fails operations
/// until it recovers.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, slot: usize, events: ConnectionEventSink) -> Arc<dyn StoreConnection>;
}
