//! # Configuration Module
//!
//! Configuration structures for the cache layer and their loading mechanisms.
//!
//! ## Key Features
//! - YAML configuration parsing with serde (durations in humantime form, e.g. `30s`)
//! - Environment variable overrides (`STORE_URL`, `POOL_SIZE`, `NAMESPACE`, ...)
//! - Validation that reports every problem at once

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{CacheError, CacheResult};
use crate::observability::logging::{LogConfig, LogFormat};
use crate::observability::metrics::MetricsConfig;

/// Top-level configuration for a [`DistributedCache`](crate::caching::DistributedCache)
/// and its companion [`RequestCacheManager`](crate::caching::RequestCacheManager).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Distributed store connection settings
    pub store: StoreConfig,

    /// Availability detection settings
    pub health: HealthConfig,

    /// Local fallback tier settings
    pub fallback: FallbackConfig,

    /// Outbound request cache settings
    pub request_cache: RequestCacheConfig,

    /// Logging settings
    pub logging: LogConfig,

    /// Metrics sampling settings
    pub metrics: MetricsConfig,
}

/// Distributed store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string for the distributed store
    pub url: String,

    /// Number of pooled connections, opened eagerly
    pub pool_size: usize,

    /// Prefix applied to every key sent to the remote store
    pub namespace: String,

    /// Hard timeout for establishing a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Hard timeout for a single store command
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Reconnect attempts before a connection gives up and latches closed
    pub reconnect_max_attempts: u32,

    /// Backoff step; attempt `n` waits `n * reconnect_base_delay`
    #[serde(with = "humantime_serde")]
    pub reconnect_base_delay: Duration,

    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,

    /// Keys requested per SCAN page during pattern deletion
    pub scan_batch_size: usize,

    /// Maximum accepted key length
    pub max_key_length: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 3,
            namespace: "app:".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(2),
            reconnect_max_attempts: 10,
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(3),
            scan_batch_size: 100,
            max_key_length: 250,
        }
    }
}

/// Availability detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Minimum time between two active probes
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Hard timeout for a single probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Local fallback tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Period of the background TTL sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Outbound request cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCacheConfig {
    /// Capacity of the response cache
    pub max_entries: usize,

    /// TTL used when a call does not supply one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Timeout applied by the reqwest transport
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RequestCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Build configuration from defaults plus environment variables
    pub fn from_env() -> CacheResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: CacheConfig = serde_yaml::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> CacheResult<()> {
        use std::env;

        if let Ok(url) = env::var("STORE_URL") {
            self.store.url = url;
        }

        if let Ok(size) = env::var("POOL_SIZE") {
            self.store.pool_size = size
                .parse()
                .map_err(|e| CacheError::config(format!("Invalid POOL_SIZE: {}", e)))?;
        }

        if let Ok(namespace) = env::var("NAMESPACE") {
            self.store.namespace = namespace;
        }

        if let Ok(ms) = env::var("HEALTH_CHECK_INTERVAL_MS") {
            self.health.check_interval = parse_millis("HEALTH_CHECK_INTERVAL_MS", &ms)?;
        }

        if let Ok(ms) = env::var("CONNECT_TIMEOUT_MS") {
            let timeout = parse_millis("CONNECT_TIMEOUT_MS", &ms)?;
            self.store.connect_timeout = timeout;
            self.health.probe_timeout = timeout;
        }

        if let Ok(attempts) = env::var("RECONNECT_MAX_ATTEMPTS") {
            self.store.reconnect_max_attempts = attempts
                .parse()
                .map_err(|e| CacheError::config(format!("Invalid RECONNECT_MAX_ATTEMPTS: {}", e)))?;
        }

        if let Ok(ms) = env::var("SWEEP_INTERVAL_MS") {
            self.fallback.sweep_interval = parse_millis("SWEEP_INTERVAL_MS", &ms)?;
        }

        if let Ok(entries) = env::var("REQUEST_CACHE_MAX_ENTRIES") {
            self.request_cache.max_entries = entries
                .parse()
                .map_err(|e| CacheError::config(format!("Invalid REQUEST_CACHE_MAX_ENTRIES: {}", e)))?;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                other => {
                    return Err(CacheError::config(format!("Invalid LOG_FORMAT: {}", other)));
                }
            };
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> CacheResult<()> {
        let mut errors = Vec::new();

        if self.store.url.trim().is_empty() {
            errors.push("store.url cannot be empty".to_string());
        }
        if self.store.pool_size == 0 {
            errors.push("store.pool_size must be at least 1".to_string());
        }
        if self.store.connect_timeout.is_zero() {
            errors.push("store.connect_timeout must be greater than 0".to_string());
        }
        if self.store.command_timeout.is_zero() {
            errors.push("store.command_timeout must be greater than 0".to_string());
        }
        if self.store.reconnect_base_delay > self.store.reconnect_max_delay {
            errors.push("store.reconnect_base_delay cannot exceed store.reconnect_max_delay".to_string());
        }
        if self.store.scan_batch_size == 0 {
            errors.push("store.scan_batch_size must be at least 1".to_string());
        }
        if self.store.max_key_length == 0 {
            errors.push("store.max_key_length must be at least 1".to_string());
        }
        if self.health.check_interval.is_zero() {
            errors.push("health.check_interval must be greater than 0".to_string());
        }
        if self.health.probe_timeout.is_zero() {
            errors.push("health.probe_timeout must be greater than 0".to_string());
        }
        if self.fallback.sweep_interval.is_zero() {
            errors.push("fallback.sweep_interval must be greater than 0".to_string());
        }
        if self.request_cache.max_entries == 0 {
            errors.push("request_cache.max_entries must be at least 1".to_string());
        }
        if self.request_cache.default_ttl.is_zero() {
            errors.push("request_cache.default_ttl must be greater than 0".to_string());
        }
        if self.metrics.enabled && self.metrics.sample_interval.is_zero() {
            errors.push("metrics.sample_interval must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(CacheError::config(errors.join("; ")));
        }

        Ok(())
    }
}

fn parse_millis(var: &str, value: &str) -> CacheResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| CacheError::config(format!("Invalid {}: {}", var, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.pool_size, 3);
        assert_eq!(config.health.check_interval, Duration::from_secs(30));
        assert_eq!(config.fallback.sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = CacheConfig::default();
        config.store.pool_size = 0;
        config.store.url = String::new();
        config.request_cache.max_entries = 0;

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("pool_size"));
        assert!(message.contains("store.url"));
        assert!(message.contains("max_entries"));
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("X", "1500").unwrap(), Duration::from_millis(1500));
        assert!(parse_millis("X", "soon").is_err());
    }

    #[tokio::test]
    async fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
store:
  url: "redis://cache.internal:6380"
  pool_size: 5
  namespace: "erp:"
  connect_timeout: 2s
health:
  check_interval: 5s
request_cache:
  max_entries: 42
"#
        )
        .unwrap();

        let config = CacheConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.store.pool_size, 5);
        assert_eq!(config.store.namespace, "erp:");
        assert_eq!(config.store.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.health.check_interval, Duration::from_secs(5));
        assert_eq!(config.request_cache.max_entries, 42);
        // untouched sections keep their defaults
        assert_eq!(config.fallback.sweep_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "store:\n  pool_size: 0").unwrap();

        let result = CacheConfig::load_from_file(file.path()).await;
        assert!(matches!(result, Err(CacheError::Configuration { .. })));
    }
}
