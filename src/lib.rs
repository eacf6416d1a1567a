//! # Resilient Cache
//!
//! A caching layer for application code that must keep serving while its distributed
//! store is unreachable.
//!
//! Application code talks to [`DistributedCache`] with `get_json`, `set_json`,
//! `delete` and `delete_by_pattern`. Reads and writes go to Redis while it is believed
//! available and degrade to a process-local fallback tier when it is not; an outage is
//! never surfaced as an error. [`RequestCacheManager`] wraps outbound HTTP calls with a
//! short-lived response cache and collapses identical concurrent calls into one.
//!
//! ## Modules
//! - [`core`]: error types and configuration
//! - [`caching`]: the cache tiers, connection pool, health monitor and request cache
//! - [`observability`]: logging setup and metrics

/// Error types and configuration shared by every component
pub mod core;

/// The cache tiers and everything that drives them
pub mod caching;

/// Structured logging and metrics
pub mod observability;

// Commonly used types, re-exported at the crate root
pub use crate::caching::{
    BoundedLruCache, CacheStats, DistributedCache, HttpTransport, LocalFallbackStore, OutboundRequest,
    RequestCacheManager, ReqwestTransport,
};
pub use crate::core::config::CacheConfig;
pub use crate::core::error::{CacheError, CacheResult, FetchError};
pub use crate::observability::{init_logging, LogConfig, LogFormat};
