//! # Cache Metrics
//!
//! Counters and gauges for the cache layer, recorded through the `metrics` facade.
//! The library never installs an exporter; applications install whichever recorder
//! they use (Prometheus, statsd, ...) and these metrics flow into it.
//!
//! Counters are recorded inline on the hot path. Gauges describing the size and health
//! of the cache are published by a [`MetricsSampler`] task that the owning
//! [`DistributedCache`](crate::caching::DistributedCache) starts and cancels.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
pub const CACHE_FALLBACK_READS_TOTAL: &str = "cache_fallback_reads_total";
pub const CACHE_REMOTE_ERRORS_TOTAL: &str = "cache_remote_errors_total";
pub const CACHE_HEALTH_PROBES_TOTAL: &str = "cache_health_probes_total";
pub const REQUEST_CACHE_HITS_TOTAL: &str = "request_cache_hits_total";
pub const REQUEST_CACHE_DEDUP_JOINS_TOTAL: &str = "request_cache_dedup_joins_total";
pub const REQUEST_CACHE_FETCHES_TOTAL: &str = "request_cache_fetches_total";

pub const CACHE_FALLBACK_ENTRIES: &str = "cache_fallback_entries";
pub const CACHE_REMOTE_AVAILABLE: &str = "cache_remote_available";
pub const CACHE_POOL_CONNECTED_SLOTS: &str = "cache_pool_connected_slots";

/// Metrics sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the gauge sampler runs
    pub enabled: bool,

    /// Period of the gauge sampler
    #[serde(with = "humantime_serde")]
    pub sample_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_interval: Duration::from_secs(15),
        }
    }
}

/// Point-in-time values published as gauges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheGauges {
    pub fallback_entries: usize,
    pub remote_available: bool,
    pub connected_slots: usize,
}

/// Record a cache hit on the given tier ("remote" or "fallback")
pub fn record_hit(tier: &'static str) {
    metrics::counter!(CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_miss() {
    metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_fallback_read() {
    metrics::counter!(CACHE_FALLBACK_READS_TOTAL).increment(1);
}

/// Record a swallowed remote failure for the given operation
pub fn record_remote_error(op: &'static str) {
    metrics::counter!(CACHE_REMOTE_ERRORS_TOTAL, "op" => op).increment(1);
}

pub fn record_probe(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(CACHE_HEALTH_PROBES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_request_cache_hit() {
    metrics::counter!(REQUEST_CACHE_HITS_TOTAL).increment(1);
}

pub fn record_dedup_join() {
    metrics::counter!(REQUEST_CACHE_DEDUP_JOINS_TOTAL).increment(1);
}

pub fn record_fetch(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(REQUEST_CACHE_FETCHES_TOTAL, "outcome" => outcome).increment(1);
}

fn publish(gauges: CacheGauges) {
    metrics::gauge!(CACHE_FALLBACK_ENTRIES).set(gauges.fallback_entries as f64);
    metrics::gauge!(CACHE_REMOTE_AVAILABLE).set(if gauges.remote_available { 1.0 } else { 0.0 });
    metrics::gauge!(CACHE_POOL_CONNECTED_SLOTS).set(gauges.connected_slots as f64);
}

/// Periodic gauge publisher owned by a cache instance
pub struct MetricsSampler;

impl MetricsSampler {
    /// Start sampling `source` every `interval` until `shutdown` is cancelled
    pub fn spawn<F>(interval: Duration, shutdown: CancellationToken, source: F) -> JoinHandle<()>
    where
        F: Fn() -> CacheGauges + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Metrics sampler stopped");
                        break;
                    }
                    _ = ticker.tick() => publish(source()),
                }
            }
        })
    }
}
