//! # Redis Store Connection
//!
//! Redis implementation of [`StoreConnection`]. Each pool slot owns one multiplexed
//! tokio connection.
//!
//! Reconnection is owned here and surfaced as events:
//! - a transport failure drops the connection and emits `error`
//! - a single background loop then emits `reconnecting` before each attempt, waiting
//!   `min(attempt * base_delay, max_delay)` and connecting under the connect timeout
//! - success emits `connected`; exhausting the attempts emits `closed`
//!
//! After giving up, operations fail fast without scheduling new attempts. The one way
//! back is an explicit `ping`, which makes a single fresh connect attempt.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{StoreConnection, StoreConnector, MAX_TTL};
use crate::caching::connection_pool::{ConnectionEvent, ConnectionEventSink};
use crate::core::config::StoreConfig;
use crate::core::error::{CacheError, CacheResult};

/// Reconnect timing for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            max_attempts: config.reconnect_max_attempts,
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
        }
    }

    /// Wait before reconnect attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Opens Redis connections for pool slots
pub struct RedisConnector {
    client: Client,
    policy: ReconnectPolicy,
    command_timeout: Duration,
}

impl RedisConnector {
    /// Validate the connection string; no connection is made here
    pub fn new(config: &StoreConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::config(format!("Invalid STORE_URL '{}': {}", config.url, e)))?;

        Ok(Self {
            client,
            policy: ReconnectPolicy::from_config(config),
            command_timeout: config.command_timeout,
        })
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self, _slot: usize, events: ConnectionEventSink) -> Arc<dyn StoreConnection> {
        Arc::new(RedisConnection::establish(self.connection_inner(events)).await)
    }
}

impl RedisConnector {
    fn connection_inner(&self, events: ConnectionEventSink) -> Arc<ConnectionInner> {
        Arc::new(ConnectionInner {
            client: self.client.clone(),
            connection: RwLock::new(None),
            reconnecting: AtomicBool::new(false),
            gave_up: AtomicBool::new(false),
            policy: self.policy,
            command_timeout: self.command_timeout,
            events,
        })
    }
}

impl RedisConnection {
    /// Make the first connection attempt; failure hands the slot to the reconnect loop
    async fn establish(inner: Arc<ConnectionInner>) -> Self {
        let slot = inner.slot();
        match inner.open().await {
            Ok(connection) => {
                *inner.connection.write() = Some(connection);
                inner.events.emit(ConnectionEvent::Connected);
                debug!(slot, "Redis connection established");
            }
            Err(e) => {
                warn!(slot, error = %e, "Initial Redis connection failed");
                inner.events.emit(ConnectionEvent::Error);
                ConnectionInner::schedule_reconnect(&inner);
            }
        }

        Self { inner }
    }
}

struct ConnectionInner {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    reconnecting: AtomicBool,
    gave_up: AtomicBool,
    policy: ReconnectPolicy,
    command_timeout: Duration,
    events: ConnectionEventSink,
}

impl ConnectionInner {
    fn slot(&self) -> usize {
        self.events.slot()
    }

    async fn open(&self) -> CacheResult<MultiplexedConnection> {
        let timeout = self.policy.connect_timeout;
        match tokio::time::timeout(timeout, self.client.get_multiplexed_async_connection()).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Drop the broken connection, report it, and start recovery
    fn on_transport_failure(self: &Arc<Self>) {
        let had_connection = self.connection.write().take().is_some();
        if had_connection {
            self.events.emit(ConnectionEvent::Error);
        }
        Self::schedule_reconnect(self);
    }

    /// Start the reconnect loop if none is running and recovery is still wanted
    fn schedule_reconnect(this: &Arc<Self>) {
        if this.gave_up.load(Ordering::Acquire) || this.events.shutdown_token().is_cancelled() {
            return;
        }
        if this
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let inner = Arc::clone(this);
        tokio::spawn(async move { inner.reconnect_loop().await });
    }

    /// Every exit clears `reconnecting` before its outcome is published
    async fn reconnect_loop(&self) {
        let shutdown = self.events.shutdown_token();
        let slot = self.slot();

        for attempt in 1..=self.policy.max_attempts {
            self.events.emit(ConnectionEvent::Reconnecting);
            let delay = self.policy.delay(attempt);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(slot, "Reconnect loop cancelled by shutdown");
                    self.reconnecting.store(false, Ordering::Release);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.open().await {
                Ok(connection) => {
                    self.reconnecting.store(false, Ordering::Release);
                    *self.connection.write() = Some(connection);
                    self.events.emit(ConnectionEvent::Connected);
                    info!(slot, attempt, "Reconnected to Redis");
                    return;
                }
                Err(e) => {
                    warn!(slot, attempt, max_attempts = self.policy.max_attempts, error = %e, "Redis reconnect attempt failed");
                }
            }
        }

        error!(
            slot,
            attempts = self.policy.max_attempts,
            "Giving up reconnecting to Redis; slot stays closed until an explicit health check succeeds"
        );
        self.gave_up.store(true, Ordering::Release);
        self.reconnecting.store(false, Ordering::Release);
        self.events.emit(ConnectionEvent::Closed);
    }
}

/// One pooled Redis connection
pub struct RedisConnection {
    inner: Arc<ConnectionInner>,
}

impl RedisConnection {
    /// Run one command under the command timeout, reporting transport failures
    async fn run<T, F, Fut>(&self, command: &'static str, op: F) -> CacheResult<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let Some(connection) = self.inner.connection.read().clone() else {
            // no-op while a loop is running or after giving up
            ConnectionInner::schedule_reconnect(&self.inner);
            return Err(CacheError::unavailable(format!(
                "redis slot {} is not connected",
                self.inner.slot()
            )));
        };

        match tokio::time::timeout(self.inner.command_timeout, op(connection)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if is_transport_error(&e) {
                    warn!(slot = self.inner.slot(), command, error = %e, "Redis transport error");
                    self.inner.on_transport_failure();
                }
                Err(CacheError::Redis(e))
            }
            Err(_) => {
                warn!(slot = self.inner.slot(), command, "Redis command timed out");
                self.inner.on_transport_failure();
                Err(CacheError::Timeout {
                    timeout_ms: self.inner.command_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// `SET .. PX` argument, clamped to [1ms, MAX_TTL]
fn px_millis(ttl: Duration) -> u64 {
    ttl.min(MAX_TTL).as_millis().max(1) as u64
}

fn is_transport_error(error: &RedisError) -> bool {
    error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() || error.is_timeout()
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let key = key.to_string();
        self.run("GET", |mut conn| async move {
            redis::cmd("GET").arg(&key).query_async::<_, Option<String>>(&mut conn).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run("SET", |mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(&value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(px_millis(ttl));
            }
            cmd.query_async::<_, ()>(&mut conn).await
        })
        .await
    }

    async fn unlink(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = keys.to_vec();
        self.run("UNLINK", |mut conn| async move {
            redis::cmd("UNLINK").arg(&keys).query_async::<_, u64>(&mut conn).await
        })
        .await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> CacheResult<(u64, Vec<String>)> {
        let pattern = pattern.to_string();
        self.run("SCAN", |mut conn| async move {
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(count)
                .query_async::<_, (u64, Vec<String>)>(&mut conn)
                .await
        })
        .await
    }

    async fn ping(&self) -> CacheResult<()> {
        let disconnected = self.inner.connection.read().is_none();
        if disconnected && self.inner.gave_up.load(Ordering::Acquire) {
            let connection = self.inner.open().await?;
            *self.inner.connection.write() = Some(connection);
            self.inner.gave_up.store(false, Ordering::Release);
            self.inner.events.emit(ConnectionEvent::Connected);
            info!(slot = self.inner.slot(), "Redis connection recovered by health check");
        }

        let response: String = self
            .run("PING", |mut conn| async move {
                redis::cmd("PING").query_async::<_, String>(&mut conn).await
            })
            .await?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(CacheError::store(format!("unexpected PING response: {}", response)))
        }
    }
}
