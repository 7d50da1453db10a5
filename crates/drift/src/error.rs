//! Error types for the drift load orchestration.

use snafu::prelude::*;

// Re-export common errors
pub use drift_core::error::{ConfigError, StorageError};

use crate::store::JobStatus;

/// Errors reported by a table store client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// A table name could not be parsed.
    #[snafu(display("Invalid table specification '{spec}', expected [project:]dataset.table"))]
    InvalidTable { spec: String },

    /// The store has no record of the job.
    #[snafu(display("Unknown job '{job_id}'"))]
    UnknownJob { job_id: String },

    /// A load job source file could not be read.
    #[snafu(display("Failed to read source file {path}: {source}"))]
    ReadSource { path: String, source: StorageError },

    /// A load job source file held a line that is not JSON.
    #[snafu(display("Failed to decode row in {path}: {source}"))]
    DecodeRow {
        path: String,
        source: serde_json::Error,
    },
}

/// Errors that can occur while writing staged files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// A row could not be serialized.
    #[snafu(display("Failed to encode row for {destination}: {source}"))]
    Encode {
        destination: String,
        source: serde_json::Error,
    },

    /// A closed file could not be persisted to temp storage.
    #[snafu(display("Failed to persist staged file {path}: {source}"))]
    Persist { path: String, source: StorageError },
}

/// Errors from submitting and awaiting load and copy jobs.
///
/// Every variant names the job it concerns; terminal failures also carry the
/// last status the store reported.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// The destination or a temp table name is invalid.
    #[snafu(display("Invalid table for job {job_id}: {source}"))]
    Table { job_id: String, source: StoreError },

    /// Submitting the job failed.
    #[snafu(display("Failed to submit job {job_id}: {source}"))]
    Submit { job_id: String, source: StoreError },

    /// Polling the job failed.
    #[snafu(display("Failed to poll job {job_id}: {source}"))]
    Poll { job_id: String, source: StoreError },

    /// The job failed with a non-retryable error.
    #[snafu(display("Job {job_id} failed permanently, last status: {status}"))]
    JobFailed { job_id: String, status: JobStatus },

    /// Every attempt failed.
    #[snafu(display("Job {job_id} failed after {attempts} attempts, last status: {status}"))]
    RetriesExhausted {
        job_id: String,
        attempts: u32,
        status: JobStatus,
    },

    /// Polling gave up before the job reached a terminal state.
    #[snafu(display("Gave up polling job {job_id} after {attempts} probes"))]
    PollExhausted { job_id: String, attempts: u32 },

    /// Shutdown was requested while the job was in flight.
    #[snafu(display("Cancelled while waiting for job {job_id}"))]
    Cancelled { job_id: String },

    /// The concurrency limiter was closed.
    #[snafu(display("Job concurrency limiter closed: {source}"))]
    Permit { source: tokio::sync::AcquireError },
}

impl LoadError {
    /// Job the error concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            LoadError::Table { job_id, .. }
            | LoadError::Submit { job_id, .. }
            | LoadError::Poll { job_id, .. }
            | LoadError::JobFailed { job_id, .. }
            | LoadError::RetriesExhausted { job_id, .. }
            | LoadError::PollExhausted { job_id, .. }
            | LoadError::Cancelled { job_id } => Some(job_id),
            LoadError::Permit { .. } => None,
        }
    }

    /// Last status observed from the store, if the job reached one.
    pub fn last_status(&self) -> Option<&JobStatus> {
        match self {
            LoadError::JobFailed { status, .. } | LoadError::RetriesExhausted { status, .. } => {
                Some(status)
            }
            _ => None,
        }
    }
}

/// Top-level pipeline errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Writing staged files failed.
    #[snafu(display("Write error: {source}"))]
    Write { source: WriteError },

    /// Loading a partition failed.
    #[snafu(display("Load into {destination} failed: {source}"))]
    Load {
        destination: String,
        source: LoadError,
    },

    /// Committing temp tables failed.
    #[snafu(display("Commit into {destination} failed: {source}"))]
    Commit {
        destination: String,
        source: LoadError,
    },

    /// Task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// The run was cancelled before it finished.
    #[snafu(display("Load run cancelled"))]
    Shutdown,
}

impl PipelineError {
    /// The underlying job error, for failures that came from a remote job.
    pub fn load_error(&self) -> Option<&LoadError> {
        match self {
            PipelineError::Load { source, .. } | PipelineError::Commit { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::Storage { source }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<WriteError> for PipelineError {
    fn from(source: WriteError) -> Self {
        PipelineError::Write { source }
    }
}
