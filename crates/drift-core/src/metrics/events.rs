//! Internal events for drift metrics emission.
//!
//! Each struct is one measurable occurrence in a load run. Events carry a
//! `target` label naming the destination table so every metric can be broken
//! down per table.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Rows handed to a file writer.
pub struct RowsWritten {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RowsWritten {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows written");
        counter!("drift_rows_written_total", "target" => self.target).increment(self.count);
    }
}

/// Staged files closed and persisted to temp storage.
pub struct FilesWritten {
    pub count: u64,
    pub bytes: u64,
    pub target: String,
}

impl InternalEvent for FilesWritten {
    fn emit(self) {
        trace!(count = self.count, bytes = self.bytes, target = %self.target, "Files written");
        counter!("drift_files_written_total", "target" => self.target.clone())
            .increment(self.count);
        counter!("drift_bytes_written_total", "target" => self.target).increment(self.bytes);
    }
}

/// Rows that overflowed a bundle's writer budget and went to the grouped path.
pub struct RowsSpilled {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RowsSpilled {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows spilled");
        counter!("drift_rows_spilled_total", "target" => self.target).increment(self.count);
    }
}

/// How a destination's partitions are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Direct,
    Staged,
}

impl PartitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Direct => "direct",
            PartitionKind::Staged => "staged",
        }
    }
}

/// Partitions produced for one destination.
pub struct PartitionsCreated {
    pub count: u64,
    pub kind: PartitionKind,
    pub target: String,
}

impl InternalEvent for PartitionsCreated {
    fn emit(self) {
        trace!(count = self.count, kind = self.kind.as_str(), target = %self.target, "Partitions created");
        counter!("drift_partitions_total", "kind" => self.kind.as_str(), "target" => self.target)
            .increment(self.count);
    }
}

/// Kind of remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Load,
    Copy,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Load => "load",
            JobKind::Copy => "copy",
        }
    }
}

/// Terminal outcome of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failed => "failed",
        }
    }
}

/// A job was submitted to the table store.
pub struct JobSubmitted {
    pub kind: JobKind,
    pub target: String,
}

impl InternalEvent for JobSubmitted {
    fn emit(self) {
        trace!(kind = self.kind.as_str(), target = %self.target, "Job submitted");
        counter!("drift_jobs_submitted_total", "kind" => self.kind.as_str(), "target" => self.target)
            .increment(1);
    }
}

/// A job reached a terminal state.
pub struct JobCompleted {
    pub kind: JobKind,
    pub outcome: JobOutcome,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for JobCompleted {
    fn emit(self) {
        trace!(
            kind = self.kind.as_str(),
            outcome = self.outcome.as_str(),
            duration_ms = self.duration.as_millis(),
            target = %self.target,
            "Job completed"
        );
        counter!(
            "drift_jobs_completed_total",
            "kind" => self.kind.as_str(),
            "outcome" => self.outcome.as_str(),
            "target" => self.target.clone()
        )
        .increment(1);
        histogram!("drift_job_duration_seconds", "kind" => self.kind.as_str(), "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// A failed job was resubmitted under the next retry index.
pub struct JobRetried {
    pub kind: JobKind,
    pub target: String,
}

impl InternalEvent for JobRetried {
    fn emit(self) {
        trace!(kind = self.kind.as_str(), target = %self.target, "Job retried");
        counter!("drift_jobs_retried_total", "kind" => self.kind.as_str(), "target" => self.target)
            .increment(1);
    }
}

/// Temp tables merged into a final table by one commit.
pub struct TempTablesCommitted {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for TempTablesCommitted {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Temp tables committed");
        counter!("drift_temp_tables_committed_total", "target" => self.target)
            .increment(self.count);
    }
}

/// Why a trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    /// The frequency elapsed since the first element of the pane.
    Timer,
    /// The pane reached its element threshold.
    Count,
    /// Input ended and the remainder was flushed.
    Drain,
}

impl FireReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FireReason::Timer => "timer",
            FireReason::Count => "count",
            FireReason::Drain => "drain",
        }
    }
}

/// A pane was released by a trigger.
pub struct PaneFired {
    pub stage: &'static str,
    pub reason: FireReason,
    pub elements: u64,
}

impl InternalEvent for PaneFired {
    fn emit(self) {
        trace!(stage = self.stage, reason = self.reason.as_str(), elements = self.elements, "Pane fired");
        counter!("drift_panes_fired_total", "stage" => self.stage, "reason" => self.reason.as_str())
            .increment(1);
    }
}

/// Destinations currently between partitioning and commit.
pub struct DestinationsInFlight {
    pub count: usize,
}

impl InternalEvent for DestinationsInFlight {
    fn emit(self) {
        trace!(count = self.count, "Destinations in flight");
        gauge!("drift_destinations_in_flight").set(self.count as f64);
    }
}

// ============================================================================
// Storage events
// ============================================================================

/// Type of storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// A storage request finished.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub duration: Duration,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request"
        );
        counter!(
            "drift_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
        histogram!("drift_storage_request_duration_seconds", "operation" => self.operation.as_str())
            .record(self.duration.as_secs_f64());
    }
}
