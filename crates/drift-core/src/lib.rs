//! drift-core: Shared infrastructure for the drift load orchestration.
//!
//! - `storage/` - Object storage abstraction for staged files (S3, GCS, local, memory)
//! - `metrics/` - Prometheus metrics infrastructure and internal events
//! - `config/` - Common configuration types and environment variable interpolation
//! - `polling` - Backoff and the generic poll-until-terminal loop
//! - `error` - Common error types
//! - `tracing` - Subscriber setup

pub mod config;
pub mod error;
pub mod metrics;
pub mod polling;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use config::{GB, GlobalConfig, KB, MB, MetricsConfig, TB};
pub use error::{ConfigError, MetricsError, StorageError};
pub use self::metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics,
    init_test as init_metrics_test,
};
pub use polling::{Backoff, Poll, PollStopped, poll_until, random_jitter};
pub use storage::{BackendConfig, StorageProvider, StorageProviderRef};
pub use self::tracing::init_tracing;
