//! In-process table store.
//!
//! Tables are vectors of JSON rows. Load jobs read their source files from the
//! same [`StorageProvider`](drift_core::StorageProvider) the writers use. A job
//! is reported `PENDING` on its first poll, `RUNNING` on the second and runs
//! to completion on the third, so callers exercise a real polling loop.

use async_trait::async_trait;
use indexmap::IndexMap;
use object_store::path::Path;
use serde_json::Value;
use snafu::prelude::*;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

use drift_core::StorageProviderRef;

use super::{JobConfiguration, JobSpec, JobStatus, TableStore};
use crate::config::{CreateDisposition, WriteDisposition};
use crate::destination::TableRef;
use crate::error::{DecodeRowSnafu, ReadSourceSnafu, StoreError, UnknownJobSnafu};

#[derive(Debug)]
struct JobRecord {
    spec: JobSpec,
    status: JobStatus,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Vec<Value>>,
    jobs: IndexMap<String, JobRecord>,
    transient_failures: u32,
    rejected: HashSet<String>,
    deleted: Vec<String>,
}

/// Table store kept in memory, with hooks to inject job failures.
pub struct InMemoryTableStore {
    storage: StorageProviderRef,
    state: Mutex<State>,
}

impl InMemoryTableStore {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self {
            storage,
            state: Mutex::new(State::default()),
        }
    }

    /// Create or replace a table.
    pub async fn create_table(&self, table: &str, rows: Vec<Value>) {
        self.state.lock().await.tables.insert(table.to_string(), rows);
    }

    /// Fail the next `count` jobs that run with a retryable error.
    pub async fn fail_next_jobs(&self, count: u32) {
        self.state.lock().await.transient_failures += count;
    }

    /// Fail every job writing into `table` with a permanent error.
    pub async fn reject_table(&self, table: &str) {
        self.state.lock().await.rejected.insert(table.to_string());
    }

    /// Rows of a table, if it exists.
    pub async fn table_rows(&self, table: &str) -> Option<Vec<Value>> {
        self.state.lock().await.tables.get(table).cloned()
    }

    /// Names of all existing tables, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        self.state.lock().await.tables.keys().cloned().collect()
    }

    /// Every distinct job submitted, in submission order, with its status.
    pub async fn jobs(&self) -> Vec<(JobSpec, JobStatus)> {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .map(|record| (record.spec.clone(), record.status.clone()))
            .collect()
    }

    /// Distinct load jobs submitted.
    pub async fn load_jobs(&self) -> Vec<JobSpec> {
        self.jobs_matching(|config| matches!(config, JobConfiguration::Load { .. }))
            .await
    }

    /// Distinct copy jobs submitted.
    pub async fn copy_jobs(&self) -> Vec<JobSpec> {
        self.jobs_matching(|config| matches!(config, JobConfiguration::Copy { .. }))
            .await
    }

    /// Tables removed through [`TableStore::delete_table`], in order.
    pub async fn deleted_tables(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    async fn jobs_matching(&self, predicate: impl Fn(&JobConfiguration) -> bool) -> Vec<JobSpec> {
        self.state
            .lock()
            .await
            .jobs
            .values()
            .filter(|record| predicate(&record.spec.configuration))
            .map(|record| record.spec.clone())
            .collect()
    }

    async fn read_rows(&self, files: &[Path]) -> Result<Vec<Value>, StoreError> {
        let mut rows = Vec::new();
        for path in files {
            let bytes = self.storage.get(path).await.context(ReadSourceSnafu {
                path: path.to_string(),
            })?;
            for line in bytes.split(|b| *b == b'\n').filter(|line| !line.is_empty()) {
                rows.push(serde_json::from_slice(line).context(DecodeRowSnafu {
                    path: path.to_string(),
                })?);
            }
        }
        Ok(rows)
    }
}

impl State {
    fn execute(&mut self, spec: &JobSpec, loaded: Option<Result<Vec<Value>, StoreError>>) -> JobStatus {
        let destination = spec.configuration.destination().to_string();

        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return failed("backend error, try again", true);
        }
        if self.rejected.contains(&destination) {
            return failed(format!("access denied writing {destination}"), false);
        }

        let rows = match (&spec.configuration, loaded) {
            (JobConfiguration::Load { .. }, Some(Ok(rows))) => rows,
            (JobConfiguration::Load { .. }, Some(Err(e))) => return failed(e.to_string(), false),
            (JobConfiguration::Load { .. }, None) => Vec::new(),
            (JobConfiguration::Copy { source_tables, .. }, _) => {
                let mut rows = Vec::new();
                for source in source_tables {
                    match self.tables.get(&source.to_string()) {
                        Some(source_rows) => rows.extend(source_rows.iter().cloned()),
                        None => return failed(format!("Not found: table {source}"), false),
                    }
                }
                rows
            }
        };

        match self.tables.entry(destination) {
            Entry::Vacant(entry) => match spec.dispositions.create {
                CreateDisposition::CreateNever => {
                    failed(format!("Not found: table {}", entry.key()), false)
                }
                CreateDisposition::CreateIfNeeded => {
                    entry.insert(rows);
                    JobStatus::Succeeded
                }
            },
            Entry::Occupied(mut entry) => match spec.dispositions.write {
                WriteDisposition::WriteEmpty if !entry.get().is_empty() => {
                    failed(format!("table {} is not empty", entry.key()), false)
                }
                WriteDisposition::WriteTruncate => {
                    entry.insert(rows);
                    JobStatus::Succeeded
                }
                WriteDisposition::WriteEmpty | WriteDisposition::WriteAppend => {
                    entry.get_mut().extend(rows);
                    JobStatus::Succeeded
                }
            },
        }
    }
}

fn failed(reason: impl Into<String>, retryable: bool) -> JobStatus {
    JobStatus::Failed {
        reason: reason.into(),
        retryable,
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn submit_job(&self, job: &JobSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.job_id) {
            debug!(job_id = %job.job_id, "Job already submitted");
            return Ok(());
        }
        state.jobs.insert(
            job.job_id.clone(),
            JobRecord {
                spec: job.clone(),
                status: JobStatus::Pending,
            },
        );
        Ok(())
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobStatus, StoreError> {
        let spec = {
            let mut state = self.state.lock().await;
            let record = state
                .jobs
                .get_mut(job_id)
                .context(UnknownJobSnafu { job_id })?;
            match &record.status {
                JobStatus::Pending => {
                    record.status = JobStatus::Running;
                    return Ok(JobStatus::Running);
                }
                JobStatus::Running => record.spec.clone(),
                terminal => return Ok(terminal.clone()),
            }
        };

        let loaded = match &spec.configuration {
            JobConfiguration::Load { source_files, .. } => Some(self.read_rows(source_files).await),
            JobConfiguration::Copy { .. } => None,
        };

        let mut state = self.state.lock().await;
        if let Some(record) = state.jobs.get(job_id)
            && record.status.is_terminal()
        {
            return Ok(record.status.clone());
        }
        let status = state.execute(&spec, loaded);
        if let Some(record) = state.jobs.get_mut(job_id) {
            record.status = status.clone();
        }
        debug!(job_id, status = %status, "Job finished");
        Ok(status)
    }

    async fn delete_table(&self, table: &TableRef) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let name = table.to_string();
        if state.tables.remove(&name).is_some() {
            state.deleted.push(name);
        }
        Ok(())
    }
}
