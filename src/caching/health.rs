//! # Health Monitor
//!
//! Tracks whether the distributed store is believed reachable and bounds how often
//! that belief is re-checked.
//!
//! - Connection events are applied immediately: `connected` marks the store available,
//!   `error` and `closed` mark it unavailable without waiting for a probe.
//! - [`HealthMonitor::is_available`] probes only when the check interval has elapsed since
//!   the last check; inside the window it answers from the cached state with no I/O.
//!   The caller that claims an elapsed window stamps the check time before probing, so
//!   a burst of concurrent callers issues at most one probe.
//! - A `closed` event means a connection exhausted its reconnect attempts. The monitor
//!   latches unavailable and stops probing until a later `connected` event or a
//!   successful forced check.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::connection_pool::ConnectionEvent;
use crate::core::config::HealthConfig;
use crate::core::error::CacheResult;
use crate::observability::metrics;

/// Availability belief for the distributed store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    /// Whether the store is currently believed reachable
    pub available: bool,

    /// When availability was last established by a probe or event
    pub last_checked_at: Option<Instant>,

    /// Set after a connection gave up reconnecting; suppresses probes
    pub latched: bool,
}

/// Serializable view of [`HealthState`]
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub available: bool,
    pub latched: bool,
    pub last_checked_ms_ago: Option<u64>,
    pub probes: u64,
}

/// Availability tracker with throttled active probing
pub struct HealthMonitor {
    state: Mutex<HealthState>,
    check_interval: Duration,
    probe_timeout: Duration,
    probes: AtomicU64,
}

impl HealthMonitor {
    /// Create a monitor; the store is unavailable until an event or probe says otherwise
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            state: Mutex::new(HealthState {
                available: false,
                last_checked_at: None,
                latched: false,
            }),
            check_interval: config.check_interval,
            probe_timeout: config.probe_timeout,
            probes: AtomicU64::new(0),
        }
    }

    /// Whether the store is available, probing with `probe` only when the window elapsed
    pub async fn is_available<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<()>>,
    {
        {
            let mut state = self.state.lock();
            if state.latched {
                return false;
            }

            let now = Instant::now();
            if let Some(last_checked_at) = state.last_checked_at {
                if now.saturating_duration_since(last_checked_at) < self.check_interval {
                    return state.available;
                }
            }

            // claim this window before any I/O
            state.last_checked_at = Some(now);
        }

        self.run_probe(probe).await
    }

    /// Probe immediately, ignoring the throttle window and the latch
    pub async fn force_check<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<()>>,
    {
        self.state.lock().last_checked_at = Some(Instant::now());
        self.run_probe(probe).await
    }

    async fn run_probe<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<()>>,
    {
        self.probes.fetch_add(1, Ordering::Relaxed);

        let success = match tokio::time::timeout(self.probe_timeout, probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Store health probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Store health probe timed out");
                false
            }
        };
        metrics::record_probe(success);

        let mut state = self.state.lock();
        if state.available != success {
            if success {
                info!("Distributed store reachable again");
            } else {
                warn!("Distributed store unreachable, serving from local fallback");
            }
        }
        state.available = success;
        state.last_checked_at = Some(Instant::now());
        if success {
            state.latched = false;
        }
        success
    }

    /// Apply a transport event reported by a pooled connection
    pub fn on_connection_event(&self, event: ConnectionEvent) {
        let mut state = self.state.lock();
        let was_available = state.available;

        match event {
            ConnectionEvent::Connected => {
                state.available = true;
                state.latched = false;
                state.last_checked_at = Some(Instant::now());
            }
            ConnectionEvent::Error => {
                state.available = false;
                state.last_checked_at = Some(Instant::now());
            }
            ConnectionEvent::Closed => {
                state.available = false;
                state.latched = true;
                state.last_checked_at = Some(Instant::now());
            }
            ConnectionEvent::Reconnecting => {}
        }

        if was_available && !state.available {
            warn!(?event, "Distributed store marked unavailable");
        } else if !was_available && state.available {
            info!("Distributed store marked available");
        }
    }

    /// Mark the store unavailable after a failed command
    pub fn report_failure(&self) {
        self.on_connection_event(ConnectionEvent::Error);
    }

    pub fn snapshot(&self) -> HealthState {
        *self.state.lock()
    }

    /// Number of active probes issued so far
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> HealthReport {
        let state = self.snapshot();
        HealthReport {
            available: state.available,
            latched: state.latched,
            last_checked_ms_ago: state
                .last_checked_at
                .map(|at| Instant::now().saturating_duration_since(at).as_millis() as u64),
            probes: self.probe_count(),
        }
    }
}
