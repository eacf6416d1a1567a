// Structured logging
pub mod logging;

// Cache metrics and the gauge sampler
pub mod metrics;

// Re-export commonly used types for convenience
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{CacheGauges, MetricsConfig, MetricsSampler};
