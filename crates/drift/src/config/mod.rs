//! Configuration for a drift load run.

mod disposition;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::time::Duration;

pub use disposition::{CreateDisposition, Dispositions, WriteDisposition};
pub use drift_core::config::{InterpolationResult, interpolate, parse_yaml, read_yaml};
pub use drift_core::{Backoff, GlobalConfig, MetricsConfig, TB};

use drift_core::error::{
    ConfigError, InvalidOptionSnafu, InvalidTempLocationSnafu, MissingTempLocationSnafu,
};
use drift_core::storage::BackendConfig;

use crate::destination::TableRef;

/// Concurrently open files per bundle before rows spill to the grouped path.
pub const DEFAULT_MAX_NUM_WRITERS_PER_BUNDLE: usize = 20;

/// Size at which a staged file is closed and a new one started.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 4 * TB;

/// Rows per bundle.
pub const DEFAULT_BUNDLE_SIZE: usize = 10_000;

/// Bundles written concurrently before input is pulled further.
pub const DEFAULT_MAX_CONCURRENT_BUNDLES: usize = 8;

/// Most files a single load job may reference.
pub const MAX_NUM_FILES: usize = 10_000;

/// Most bytes a single load job may reference.
pub const MAX_SIZE_BYTES: u64 = 11 * TB;

/// Buffered rows that fire a file-write pane in triggered mode.
pub const FILE_TRIGGERING_RECORD_COUNT: u64 = 500_000;

fn default_max_num_writers_per_bundle() -> usize {
    DEFAULT_MAX_NUM_WRITERS_PER_BUNDLE
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_bundle_size() -> usize {
    DEFAULT_BUNDLE_SIZE
}

fn default_max_concurrent_bundles() -> usize {
    DEFAULT_MAX_CONCURRENT_BUNDLES
}

fn default_file_triggering_record_count() -> u64 {
    FILE_TRIGGERING_RECORD_COUNT
}

fn default_max_files() -> usize {
    MAX_NUM_FILES
}

fn default_max_bytes() -> u64 {
    MAX_SIZE_BYTES
}

/// Bounds on a single partition, i.e. on what one load job references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionLimits {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for PartitionLimits {
    fn default() -> Self {
        Self {
            max_files: MAX_NUM_FILES,
            max_bytes: MAX_SIZE_BYTES,
        }
    }
}

/// Which control path wraps the write and load stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Fire once after all input arrived.
    Untriggered,
    /// Write and load periodically.
    Triggered { frequency: Duration },
}

/// Configuration of one load run.
///
/// # Example
///
/// ```yaml
/// temp_location: gs://bucket/tmp
/// write_disposition: WRITE_APPEND
/// create_disposition: CREATE_IF_NEEDED
/// num_file_shards: 4
/// triggering_frequency_secs: 300
///
/// poll:
///   initial_ms: 1000
///   max_ms: 60000
///
/// global:
///   total_concurrency: 8
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    /// Storage URL under which staged files are written.
    #[serde(default)]
    pub temp_location: String,
    /// Write disposition for the final tables.
    #[serde(default)]
    pub write_disposition: WriteDisposition,
    /// Create disposition for the final tables.
    #[serde(default)]
    pub create_disposition: CreateDisposition,
    /// Open files per bundle before rows spill (dynamic sharding only).
    #[serde(default = "default_max_num_writers_per_bundle")]
    pub max_num_writers_per_bundle: usize,
    /// Roll a staged file once it reaches this many bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Fixed number of shards per destination; 0 selects dynamic sharding.
    #[serde(default)]
    pub num_file_shards: u32,
    /// Load periodically instead of once at the end of input.
    #[serde(default)]
    pub triggering_frequency_secs: Option<u64>,
    /// Always go through temp tables, and create the default destination
    /// even when no row was written.
    #[serde(default)]
    pub singleton_table: bool,
    /// Table created by a singleton load that received no rows.
    #[serde(default)]
    pub default_destination: Option<String>,
    /// Rows per processing bundle.
    #[serde(default = "default_bundle_size")]
    pub bundle_size: usize,
    /// Bundles in flight at once in the untriggered path.
    #[serde(default = "default_max_concurrent_bundles")]
    pub max_concurrent_bundles: usize,
    /// Buffered rows that fire a file-write pane in triggered mode.
    #[serde(default = "default_file_triggering_record_count")]
    pub file_triggering_record_count: u64,
    /// Per-partition bounds.
    #[serde(default)]
    pub partition_limits: PartitionLimits,
    /// Backoff between job status probes.
    #[serde(default)]
    pub poll: Backoff,
    /// Global configuration options.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LoadConfig {
    /// Configuration with defaults for everything but the temp location.
    pub fn new(temp_location: impl Into<String>) -> Self {
        Self {
            temp_location: temp_location.into(),
            write_disposition: WriteDisposition::default(),
            create_disposition: CreateDisposition::default(),
            max_num_writers_per_bundle: DEFAULT_MAX_NUM_WRITERS_PER_BUNDLE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            num_file_shards: 0,
            triggering_frequency_secs: None,
            singleton_table: false,
            default_destination: None,
            bundle_size: DEFAULT_BUNDLE_SIZE,
            max_concurrent_bundles: DEFAULT_MAX_CONCURRENT_BUNDLES,
            file_triggering_record_count: FILE_TRIGGERING_RECORD_COUNT,
            partition_limits: PartitionLimits::default(),
            poll: Backoff::default(),
            global: GlobalConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load configuration from a file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_yaml(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// User dispositions for the final tables.
    pub fn dispositions(&self) -> Dispositions {
        Dispositions::new(self.write_disposition, self.create_disposition)
    }

    /// Control path selected by `triggering_frequency_secs`.
    pub fn trigger_mode(&self) -> TriggerMode {
        match self.triggering_frequency_secs {
            Some(secs) => TriggerMode::Triggered {
                frequency: Duration::from_secs(secs),
            },
            None => TriggerMode::Untriggered,
        }
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.temp_location.trim().is_empty(), MissingTempLocationSnafu);
        if BackendConfig::parse_url(&self.temp_location).is_err() {
            return InvalidTempLocationSnafu {
                location: self.temp_location.clone(),
            }
            .fail();
        }

        if let Some(secs) = self.triggering_frequency_secs {
            ensure!(
                secs > 0,
                InvalidOptionSnafu {
                    message: "triggering_frequency_secs must be greater than zero",
                }
            );
            ensure!(
                self.num_file_shards > 0,
                InvalidOptionSnafu {
                    message: "num_file_shards must be set when triggering_frequency_secs is set",
                }
            );
            ensure!(
                self.file_triggering_record_count > 0,
                InvalidOptionSnafu {
                    message: "file_triggering_record_count must be greater than zero",
                }
            );
        }

        if self.singleton_table {
            let Some(table) = &self.default_destination else {
                return InvalidOptionSnafu {
                    message: "singleton_table requires default_destination",
                }
                .fail();
            };
            if table.parse::<TableRef>().is_err() {
                return InvalidOptionSnafu {
                    message: format!("default_destination '{table}' is not a valid table"),
                }
                .fail();
            }
        }

        ensure!(
            self.max_file_size > 0,
            InvalidOptionSnafu {
                message: "max_file_size must be greater than zero",
            }
        );
        ensure!(
            self.bundle_size > 0,
            InvalidOptionSnafu {
                message: "bundle_size must be greater than zero",
            }
        );
        ensure!(
            self.max_concurrent_bundles > 0,
            InvalidOptionSnafu {
                message: "max_concurrent_bundles must be greater than zero",
            }
        );
        ensure!(
            self.partition_limits.max_files > 0 && self.partition_limits.max_bytes > 0,
            InvalidOptionSnafu {
                message: "partition_limits must be greater than zero",
            }
        );
        ensure!(
            self.global.total_concurrency != Some(0),
            InvalidOptionSnafu {
                message: "global.total_concurrency must be greater than zero",
            }
        );

        Ok(())
    }
}
