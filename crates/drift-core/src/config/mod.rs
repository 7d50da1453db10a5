//! Common configuration types shared by drift components.

mod vars;

pub use vars::{InterpolationResult, interpolate};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, EnvInterpolationSnafu, ReadFileSnafu, YamlParseSnafu};
use snafu::ResultExt;

/// Byte size constants (binary/IEC units).
pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;
pub const TB: u64 = 1024 * GB;

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    crate::metrics::DEFAULT_METRICS_ADDR.to_string()
}

/// Process-wide options shared by every destination being loaded.
///
/// # Examples
///
/// ```
/// use drift_core::config::GlobalConfig;
///
/// let config = GlobalConfig::default();
/// assert_eq!(config.total_concurrency, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Upper bound on remote jobs (loads and copies) in flight at once.
    ///
    /// `None` leaves concurrency to the number of partitions.
    #[serde(default)]
    pub total_concurrency: Option<usize>,
}

impl GlobalConfig {
    /// Create a GlobalConfig with a specific concurrency limit.
    pub fn with_concurrency(limit: usize) -> Self {
        Self {
            total_concurrency: Some(limit),
        }
    }
}

/// Interpolate environment variables and deserialize a YAML document.
///
/// Every missing variable is reported at once rather than failing on the first.
pub fn parse_yaml<T: serde::de::DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let result = interpolate(contents);
    if !result.is_ok() {
        return EnvInterpolationSnafu {
            message: result.errors.join("\n"),
        }
        .fail();
    }

    serde_yaml::from_str(&result.text).context(YamlParseSnafu)
}

/// Read a YAML file from disk and deserialize it with [`parse_yaml`].
pub fn read_yaml<T: serde::de::DeserializeOwned>(
    path: impl AsRef<std::path::Path>,
) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;
    parse_yaml(&contents)
}
