//! # Error Handling Module
//!
//! Error types for the cache layer, built on the `thiserror` crate.
//!
//! Errors fall into two classes:
//! - **Availability errors** (`Redis`, `Timeout`, `Unavailable`, `Store`): produced by the
//!   distributed store and its connections. The [`DistributedCache`](crate::caching::DistributedCache)
//!   facade absorbs these and degrades to the local fallback tier, so callers never see them.
//! - **Misuse errors** (`InvalidKey`, `InvalidTtl`, `InvalidPattern`, `Configuration`,
//!   `Serialization`): contract violations by the caller. These are returned synchronously
//!   and are never swallowed.
//!
//! Outbound request failures have their own [`FetchError`] type. It is `Clone` because a
//! single failed network call is observed by every deduplicated caller waiting on it.

use thiserror::Error;

/// Result type used throughout the cache layer
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, Error)]
pub enum CacheError {
    /// Errors reported by the Redis client (connection refused, protocol errors, etc.)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A store command or probe exceeded its deadline
    #[error("Cache operation timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The connection backing an operation is not currently usable
    #[error("Cache not available: {reason}")]
    Unavailable { reason: String },

    /// Generic store failure
    #[error("Cache store error: {message}")]
    Store { message: String },

    /// Invalid or inconsistent configuration
    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    /// Empty or oversized cache key
    #[error("Invalid cache key: {reason}")]
    InvalidKey { reason: String },

    /// TTL that can never hold a value
    #[error("Invalid TTL: {reason}")]
    InvalidTtl { reason: String },

    /// Deletion pattern that cannot be matched
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Outbound request failure surfaced by the request cache
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl CacheError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unavailable error with a custom reason
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a store error with a custom message
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an invalid key error
    pub fn invalid_key<S: Into<String>>(reason: S) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create an invalid TTL error
    pub fn invalid_ttl<S: Into<String>>(reason: S) -> Self {
        Self::InvalidTtl {
            reason: reason.into(),
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern<P: Into<String>, S: Into<String>>(pattern: P, reason: S) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error signals caller misuse rather than runtime degradation.
    ///
    /// Misuse errors are surfaced to the caller; everything else is absorbed by the facade.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::InvalidKey { .. }
                | Self::InvalidTtl { .. }
                | Self::InvalidPattern { .. }
                | Self::Serialization(_)
        )
    }
}

/// Outbound request failures, shared by every caller deduplicated onto one call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request never produced a response (DNS, connect, timeout, etc.)
    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The upstream answered with a non-success status
    #[error("Request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    /// The response body could not be decoded into the requested type
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// Create a transport error
    pub fn transport<U: Into<String>, S: Into<String>>(url: U, message: S) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<U: Into<String>, S: Into<String>>(url: U, message: S) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }
}
