//! drift: bulk table loads through staged files.
//!
//! Rows keyed by destination table are written to newline-delimited JSON
//! files under a temp location, grouped into partitions bounded by file count
//! and bytes, and loaded with deterministic load jobs. A destination with more
//! than one partition is loaded into temp tables first and committed with a
//! single copy job.
//!
//! - `writer/` - per-bundle file writers and the grouped spill path
//! - `partition` - packing of files into load-job sized partitions
//! - `job` - job ids and the submit, poll and retry loop
//! - `loader` / `committer` - load and copy stages
//! - `trigger` - pane buffers for periodic loads
//! - `pipeline/` - the untriggered and triggered control paths
//! - `store/` - the table store seam and an in-memory implementation

pub mod committer;
pub mod config;
pub mod context;
pub mod destination;
pub mod error;
pub mod job;
pub mod loader;
pub mod partition;
pub mod pipeline;
pub mod shard;
pub mod stage;
pub mod store;
pub mod trigger;
pub mod writer;

// Re-export commonly used items
pub use config::{CreateDisposition, Dispositions, LoadConfig, WriteDisposition};
pub use context::JobIdToken;
pub use destination::{DestinationKey, TableRef};
pub use error::{LoadError, PipelineError};
pub use pipeline::{BatchLoads, KeyedRow, LoadStats, WriteResult};
pub use store::{InMemoryTableStore, JobStatus, TableStore, TableStoreRef};

pub use drift_core::{StorageProvider, StorageProviderRef, init_metrics, init_tracing};
