//! Table store abstraction.
//!
//! The remote store owns tables and runs load and copy jobs. This module
//! defines the `TableStore` trait the loader and committer are written
//! against, plus an in-memory implementation.

mod memory;

pub use memory::InMemoryTableStore;

use async_trait::async_trait;
use object_store::path::Path;
use std::fmt;
use std::sync::Arc;

use crate::config::Dispositions;
use crate::destination::TableRef;
use crate::error::StoreError;

/// Status of a job as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed { reason: String, retryable: bool },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed { .. })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("PENDING"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::Succeeded => f.write_str("SUCCESS"),
            JobStatus::Failed { reason, retryable } => {
                let kind = if *retryable { "retryable" } else { "permanent" };
                write!(f, "FAILED ({kind}): {reason}")
            }
        }
    }
}

/// What a job does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobConfiguration {
    /// Load staged files into a table.
    Load {
        /// Files relative to the temp storage root.
        source_files: Vec<Path>,
        destination: TableRef,
    },
    /// Copy the union of several tables into one.
    Copy {
        source_tables: Vec<TableRef>,
        destination: TableRef,
    },
}

impl JobConfiguration {
    pub fn destination(&self) -> &TableRef {
        match self {
            JobConfiguration::Load { destination, .. } | JobConfiguration::Copy { destination, .. } => {
                destination
            }
        }
    }
}

/// A job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: String,
    pub configuration: JobConfiguration,
    pub dispositions: Dispositions,
}

/// Client of a remote table store.
///
/// Job ids are chosen by the caller. Submitting an id the store already knows
/// must not start a second job, which makes resubmission after a crash or
/// redelivery safe.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Submit a job. Resubmitting a known job id is a no-op.
    async fn submit_job(&self, job: &JobSpec) -> Result<(), StoreError>;

    /// Current status of a job.
    async fn poll_job(&self, job_id: &str) -> Result<JobStatus, StoreError>;

    /// Delete a table. Deleting a missing table succeeds.
    async fn delete_table(&self, table: &TableRef) -> Result<(), StoreError>;
}

/// Shared handle to a table store.
pub type TableStoreRef = Arc<dyn TableStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Succeeded.to_string(), "SUCCESS");
        let failed = JobStatus::Failed {
            reason: "quota".to_string(),
            retryable: true,
        };
        assert_eq!(failed.to_string(), "FAILED (retryable): quota");
        assert!(failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
