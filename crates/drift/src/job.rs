//! Deterministic job ids and the submit, poll and retry loop.
//!
//! Every id derives from the run's [`JobIdToken`], a digest of the
//! destination, the pane, the partition and the retry index. Re-running a
//! stage after redelivery therefore resubmits the same ids, which the table
//! store deduplicates.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drift_core::metrics::events::{JobCompleted, JobKind, JobOutcome, JobRetried, JobSubmitted};
use drift_core::{Backoff, Poll, PollStopped, emit, poll_until};

use crate::context::JobIdToken;
use crate::destination::DestinationKey;
use crate::error::{
    CancelledSnafu, JobFailedSnafu, LoadError, PermitSnafu, PollExhaustedSnafu, PollSnafu,
    RetriesExhaustedSnafu, StoreError, SubmitSnafu,
};
use crate::store::{JobSpec, JobStatus, TableStoreRef};

/// Attempts per job before a retryable failure becomes fatal.
pub const MAX_RETRY_JOBS: u32 = 3;

/// Prefix shared by every attempt of one partition's load job.
///
/// Also names the partition's temp table.
///
/// # Examples
///
/// ```
/// use drift::context::JobIdToken;
/// use drift::destination::DestinationKey;
/// use drift::job::{job_id_prefix, load_job_id};
///
/// let token = JobIdToken::new("run");
/// let dest = DestinationKey::new("dataset.events");
/// let prefix = job_id_prefix(&token, &dest, 0, 3);
/// assert!(prefix.starts_with("run_"));
/// assert!(prefix.ends_with("_00000_00003"));
/// assert_eq!(load_job_id(&prefix, 1), format!("{prefix}-1"));
/// ```
pub fn job_id_prefix(
    token: &JobIdToken,
    destination: &DestinationKey,
    pane: u64,
    partition: usize,
) -> String {
    format!(
        "{token}_{}_{pane:05}_{partition:05}",
        destination.digest()
    )
}

/// Id of one load attempt.
pub fn load_job_id(prefix: &str, retry: u32) -> String {
    format!("{prefix}-{retry}")
}

/// Id of one commit attempt for a destination's temp tables in a pane.
pub fn copy_job_id(token: &JobIdToken, destination: &DestinationKey, pane: u64, retry: u32) -> String {
    format!(
        "{token}_{}_{pane:05}_copy-{retry}",
        destination.digest()
    )
}

/// Runs jobs to completion against a table store.
#[derive(Clone)]
pub struct JobRunner {
    store: TableStoreRef,
    backoff: Backoff,
    shutdown: CancellationToken,
    global_semaphore: Option<Arc<Semaphore>>,
}

impl JobRunner {
    pub fn new(
        store: TableStoreRef,
        backoff: Backoff,
        shutdown: CancellationToken,
        global_semaphore: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            store,
            backoff,
            shutdown,
            global_semaphore,
        }
    }

    pub fn store(&self) -> &TableStoreRef {
        &self.store
    }

    /// Submit and await a job, retrying retryable failures.
    ///
    /// `spec_for` builds the submission for a retry index; each attempt must
    /// carry a distinct job id. Returns the id of the attempt that succeeded.
    pub async fn run(
        &self,
        kind: JobKind,
        target: &DestinationKey,
        spec_for: impl Fn(u32) -> JobSpec,
    ) -> Result<String, LoadError> {
        let mut retry = 0;
        loop {
            let spec = spec_for(retry);
            let status = self.attempt(kind, target, &spec).await?;

            match status {
                JobStatus::Succeeded => return Ok(spec.job_id),
                JobStatus::Failed {
                    retryable: true, ..
                } if retry + 1 < MAX_RETRY_JOBS => {
                    warn!(
                        target = %target,
                        job_id = %spec.job_id,
                        status = %status,
                        "Job failed, retrying under a new job id"
                    );
                    emit!(JobRetried {
                        kind,
                        target: target.to_string(),
                    });
                    retry += 1;
                }
                JobStatus::Failed {
                    retryable: true, ..
                } => {
                    return RetriesExhaustedSnafu {
                        job_id: spec.job_id,
                        attempts: retry + 1,
                        status,
                    }
                    .fail();
                }
                status => {
                    return JobFailedSnafu {
                        job_id: spec.job_id,
                        status,
                    }
                    .fail();
                }
            }
        }
    }

    /// Submit one attempt and poll it to a terminal status.
    async fn attempt(
        &self,
        kind: JobKind,
        target: &DestinationKey,
        spec: &JobSpec,
    ) -> Result<JobStatus, LoadError> {
        let _permit = match &self.global_semaphore {
            Some(semaphore) => Some(semaphore.acquire().await.context(PermitSnafu)?),
            None => None,
        };

        let job_id = spec.job_id.as_str();
        let start = Instant::now();

        self.store
            .submit_job(spec)
            .await
            .context(SubmitSnafu { job_id })?;
        emit!(JobSubmitted {
            kind,
            target: target.to_string(),
        });
        debug!(target = %target, job_id, kind = kind.as_str(), "Submitted job");

        let polled = poll_until(&self.backoff, &self.shutdown, || async {
            let status = self.store.poll_job(job_id).await?;
            Ok::<_, StoreError>(if status.is_terminal() {
                Poll::Ready(status)
            } else {
                Poll::Pending
            })
        })
        .await;

        let status = match polled {
            Ok(status) => status,
            Err(PollStopped::Probe(source)) => return Err(source).context(PollSnafu { job_id }),
            Err(PollStopped::Cancelled) => return CancelledSnafu { job_id }.fail(),
            Err(PollStopped::Exhausted { attempts }) => {
                return PollExhaustedSnafu { job_id, attempts }.fail();
            }
        };

        let outcome = match status {
            JobStatus::Succeeded => JobOutcome::Success,
            _ => JobOutcome::Failed,
        };
        emit!(JobCompleted {
            kind,
            outcome,
            duration: start.elapsed(),
            target: target.to_string(),
        });
        info!(
            target = %target,
            job_id,
            kind = kind.as_str(),
            status = %status,
            elapsed_ms = start.elapsed().as_millis(),
            "Job finished"
        );

        Ok(status)
    }
}
