//! # Connection Pool Module
//!
//! A fixed-size pool of long-lived connections to the distributed store, selected by
//! round-robin. Connections are opened eagerly at construction so the first request
//! does not pay the connection cost.
//!
//! There is no health-aware routing: a slot whose connection is unhealthy stays in the
//! rotation and is expected to recover through its own reconnect logic.
//!
//! ## Connection state machine
//! Each slot tracks a [`ConnectionState`] driven by the discrete [`ConnectionEvent`]s its
//! connection reports through a [`ConnectionEventSink`]. The sink applies the transition
//! and forwards the event to the [`HealthMonitor`] synchronously; the pool itself never
//! interprets events.
//!
//! ## Rust Concepts Used
//! - `AtomicUsize::fetch_update` for an increment-and-wrap cursor in one atomic step
//! - `Arc<dyn StoreConnection>` so the pool works with any store implementation

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::health::HealthMonitor;
use super::stores::{StoreConnection, StoreConnector};
use crate::core::error::{CacheError, CacheResult};

/// Lifecycle state of one pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial connect or a reconnect attempt is in progress
    Connecting,
    /// Ready for commands
    Connected,
    /// Last command or connect failed; recovery pending
    Degraded,
    /// Gave up reconnecting, or shut down
    Closed,
}

/// Transport-level event reported by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEvent {
    Connected,
    Error,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    /// Apply an event to this state
    pub fn transition(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::Connected) => S::Connected,
            (_, E::Closed) => S::Closed,
            (S::Closed, _) => S::Closed,
            (_, E::Error) => S::Degraded,
            (_, E::Reconnecting) => S::Connecting,
        }
    }
}

/// Reporting handle given to the connection in one pool slot
#[derive(Clone)]
pub struct ConnectionEventSink {
    slot: usize,
    states: Arc<Vec<Mutex<ConnectionState>>>,
    health: Arc<HealthMonitor>,
    shutdown: CancellationToken,
}

impl ConnectionEventSink {
    /// Slot index this sink reports for
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Current state of the slot
    pub fn state(&self) -> ConnectionState {
        *self.states[self.slot].lock()
    }

    /// Token cancelled when the owning cache shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Apply `event` to the slot state and forward it to the health monitor
    pub fn emit(&self, event: ConnectionEvent) {
        let (previous, next) = {
            let mut state = self.states[self.slot].lock();
            let previous = *state;
            *state = previous.transition(event);
            (previous, *state)
        };

        if previous != next {
            debug!(slot = self.slot, ?previous, ?next, ?event, "Connection state changed");
        }

        self.health.on_connection_event(event);
    }
}

/// Fixed-size round-robin pool of store connections
pub struct ConnectionPool {
    connections: Vec<Arc<dyn StoreConnection>>,
    states: Arc<Vec<Mutex<ConnectionState>>>,
    cursor: AtomicUsize,
}

impl ConnectionPool {
    /// Open `size` connections eagerly, one per slot
    pub async fn new(
        size: usize,
        connector: &dyn StoreConnector,
        health: Arc<HealthMonitor>,
        shutdown: CancellationToken,
    ) -> CacheResult<Self> {
        if size == 0 {
            return Err(CacheError::config("pool size must be at least 1"));
        }

        let states: Arc<Vec<Mutex<ConnectionState>>> =
            Arc::new((0..size).map(|_| Mutex::new(ConnectionState::Connecting)).collect());

        let connections = join_all((0..size).map(|slot| {
            let sink = ConnectionEventSink {
                slot,
                states: Arc::clone(&states),
                health: Arc::clone(&health),
                shutdown: shutdown.clone(),
            };
            connector.connect(slot, sink)
        }))
        .await;

        let pool = Self {
            connections,
            states,
            cursor: AtomicUsize::new(0),
        };

        info!(
            size,
            connected = pool.connected_count(),
            "Connection pool initialized"
        );
        Ok(pool)
    }

    /// Advance the cursor and return the slot it now points at
    pub fn next_slot(&self) -> usize {
        let len = self.connections.len();
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| Some((cursor + 1) % len))
            .unwrap_or_else(|cursor| cursor);
        (previous + 1) % len
    }

    /// Select the next connection in round-robin order
    pub fn acquire(&self) -> Arc<dyn StoreConnection> {
        Arc::clone(&self.connections[self.next_slot()])
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every slot's state
    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.iter().map(|state| *state.lock()).collect()
    }

    /// Number of slots currently connected
    pub fn connected_count(&self) -> usize {
        self.states
            .iter()
            .filter(|state| *state.lock() == ConnectionState::Connected)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HealthConfig;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SlotConnection {
        slot: usize,
    }

    #[async_trait]
    impl StoreConnection for SlotConnection {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Ok(Some(self.slot.to_string()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
            Ok(())
        }
        async fn unlink(&self, _keys: &[String]) -> CacheResult<u64> {
            Ok(0)
        }
        async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> CacheResult<(u64, Vec<String>)> {
            Ok((0, Vec::new()))
        }
        async fn ping(&self) -> CacheResult<()> {
            Ok(())
        }
    }

    /// Connects every slot except the ones listed in `failing`
    struct SlotConnector {
        failing: Vec<usize>,
    }

    #[async_trait]
    impl StoreConnector for SlotConnector {
        async fn connect(&self, slot: usize, events: ConnectionEventSink) -> Arc<dyn StoreConnection> {
            if self.failing.contains(&slot) {
                events.emit(ConnectionEvent::Error);
            } else {
                events.emit(ConnectionEvent::Connected);
            }
            Arc::new(SlotConnection { slot })
        }
    }

    async fn pool(size: usize, failing: Vec<usize>) -> (ConnectionPool, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new(&HealthConfig::default()));
        let pool = ConnectionPool::new(
            size,
            &SlotConnector { failing },
            Arc::clone(&health),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        (pool, health)
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionEvent as E;
        use ConnectionState as S;

        assert_eq!(S::Connecting.transition(E::Connected), S::Connected);
        assert_eq!(S::Connected.transition(E::Error), S::Degraded);
        assert_eq!(S::Degraded.transition(E::Reconnecting), S::Connecting);
        assert_eq!(S::Connecting.transition(E::Closed), S::Closed);
        assert_eq!(S::Closed.transition(E::Error), S::Closed);
        assert_eq!(S::Closed.transition(E::Reconnecting), S::Closed);
        assert_eq!(S::Closed.transition(E::Connected), S::Connected);
    }

    #[tokio::test]
    async fn test_round_robin_visits_slots_cyclically() {
        let (pool, _) = pool(3, vec![]).await;

        let visited: Vec<usize> = (0..7).map(|_| pool.next_slot()).collect();
        assert_eq!(visited, vec![1, 2, 0, 1, 2, 0, 1]);
    }

    #[tokio::test]
    async fn test_round_robin_fairness() {
        let (pool, _) = pool(4, vec![]).await;

        let mut counts = [0usize; 4];
        for _ in 0..1001 {
            let slot: usize = pool.acquire().get("k").await.unwrap().unwrap().parse().unwrap();
            counts[slot] += 1;
        }
        for count in counts {
            assert!((250..=251).contains(&count), "uneven distribution: {:?}", counts);
        }
    }

    #[tokio::test]
    async fn test_concurrent_acquire_stays_fair() {
        let (pool, _) = pool(3, vec![]).await;
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { (0..300).map(|_| pool.next_slot()).collect::<Vec<_>>() })
            })
            .collect();

        let mut counts = [0usize; 3];
        for handle in handles {
            for slot in handle.await.unwrap() {
                counts[slot] += 1;
            }
        }
        assert_eq!(counts, [800, 800, 800]);
    }

    #[tokio::test]
    async fn test_events_update_slot_state_and_health() {
        let (pool, health) = pool(3, vec![1]).await;

        assert_eq!(
            pool.states(),
            vec![ConnectionState::Connected, ConnectionState::Degraded, ConnectionState::Connected]
        );
        assert_eq!(pool.connected_count(), 2);
        // the slot-1 error arrived after slot 0 connected and before slot 2 did
        assert!(health.snapshot().available);
    }

    #[tokio::test]
    async fn test_zero_size_pool_is_rejected() {
        let health = Arc::new(HealthMonitor::new(&HealthConfig::default()));
        let result = ConnectionPool::new(
            0,
            &SlotConnector { failing: vec![] },
            health,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }
}
