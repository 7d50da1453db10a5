//! Orchestration of a load run.
//!
//! [`BatchLoads`] picks the control path from the configuration:
//!
//! - untriggered: every row is written, all staged files are gathered, and
//!   one load pane partitions, loads and commits them
//! - triggered: files are written and loaded periodically, each load pane
//!   committing its destinations as soon as their temp tables are ready

mod batch;
mod pane;
mod triggered;
mod write;

use futures::Stream;
use serde_json::Value;
use snafu::ResultExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drift_core::{StorageProvider, StorageProviderRef};

use crate::committer::TableCommitter;
use crate::config::{LoadConfig, TriggerMode};
use crate::context::{JobIdToken, LoadContext, LoadContextRef};
use crate::destination::DestinationKey;
use crate::error::{PipelineError, TaskJoinSnafu};
use crate::job::JobRunner;
use crate::loader::TableLoader;
use crate::stage::StageExecutor;
use crate::store::TableStoreRef;

/// A row together with the table it is destined for.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRow {
    pub destination: DestinationKey,
    pub row: Value,
}

impl KeyedRow {
    pub fn new(destination: impl Into<DestinationKey>, row: Value) -> Self {
        Self {
            destination: destination.into(),
            row,
        }
    }
}

/// Counters describing what a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub files_written: usize,
    /// Summed over bundles: destinations written inline.
    pub inline_destinations: usize,
    /// Summed over bundles: destinations that overflowed to the grouped path.
    pub spilled_destinations: usize,
    pub partitions: usize,
    /// Partitions loaded straight into their final table.
    pub direct_loads: usize,
    /// Partitions loaded into temp tables.
    pub temp_tables: usize,
    /// Copy jobs that merged temp tables into a final table.
    pub commits: usize,
    /// Load panes executed.
    pub panes: usize,
}

impl LoadStats {
    fn merge(&mut self, other: LoadStats) {
        self.files_written += other.files_written;
        self.inline_destinations += other.inline_destinations;
        self.spilled_destinations += other.spilled_destinations;
        self.partitions += other.partitions;
        self.direct_loads += other.direct_loads;
        self.temp_tables += other.temp_tables;
        self.commits += other.commits;
        self.panes += other.panes;
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    failed_inserts: Vec<Value>,
    pub stats: LoadStats,
}

impl WriteResult {
    /// Rows rejected individually.
    ///
    /// Always empty: a failed load job fails its whole destination and the
    /// run, never single rows.
    pub fn failed_inserts(&self) -> &[Value] {
        &self.failed_inserts
    }
}

/// Shared state handed to every part of a run.
#[derive(Clone)]
pub(crate) struct RunEnv {
    pub config: Arc<LoadConfig>,
    pub ctx: LoadContextRef,
    pub executor: StageExecutor,
    pub shutdown: CancellationToken,
}

/// Bulk loads keyed rows into a table store.
pub struct BatchLoads {
    config: LoadConfig,
    store: TableStoreRef,
    storage: StorageProviderRef,
    shutdown: CancellationToken,
    token: JobIdToken,
}

impl BatchLoads {
    /// Validate `config` and open its temp location.
    pub async fn new(config: LoadConfig, store: TableStoreRef) -> Result<Self, PipelineError> {
        config.validate()?;
        let storage = Arc::new(StorageProvider::for_url(&config.temp_location).await?);
        Self::with_storage(config, store, storage)
    }

    /// Like [`new`](Self::new), but with an already opened temp storage.
    pub fn with_storage(
        config: LoadConfig,
        store: TableStoreRef,
        storage: StorageProviderRef,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            storage,
            shutdown: CancellationToken::new(),
            token: JobIdToken::generate(),
        })
    }

    /// Stop the run when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Derive job ids from a known token instead of a fresh one.
    pub fn with_token(mut self, token: JobIdToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &JobIdToken {
        &self.token
    }

    /// Write, load and commit every row of `input`.
    ///
    /// A fatal error cancels all in-flight jobs of the run and is returned.
    /// Destinations committed before the failure stay committed.
    pub async fn run<S>(self, input: S) -> Result<WriteResult, PipelineError>
    where
        S: Stream<Item = KeyedRow> + Send + Unpin,
    {
        let shutdown = self.shutdown.child_token();
        let global_semaphore = self
            .config
            .global
            .total_concurrency
            .map(|n| Arc::new(Semaphore::new(n)));

        let ctx = Arc::new(LoadContext::new(self.token, self.storage));
        let runner = JobRunner::new(
            self.store,
            self.config.poll.clone(),
            shutdown.clone(),
            global_semaphore,
        );
        let executor = StageExecutor::new(
            TableLoader::new(runner.clone(), ctx.clone()),
            TableCommitter::new(runner, ctx.clone()),
        );

        let mode = self.config.trigger_mode();
        info!(
            token = %ctx.token,
            temp_prefix = %ctx.temp_prefix,
            storage = ctx.storage.canonical_url(),
            mode = ?mode,
            "Starting load run"
        );

        let env = RunEnv {
            config: Arc::new(self.config),
            ctx,
            executor,
            shutdown: shutdown.clone(),
        };

        let result = match mode {
            TriggerMode::Untriggered => batch::run(env, input).await,
            TriggerMode::Triggered { frequency } => triggered::run(env, input, frequency).await,
        };

        match result {
            Ok(stats) => {
                info!(?stats, "Load run complete");
                Ok(WriteResult {
                    failed_inserts: Vec::new(),
                    stats,
                })
            }
            Err(e) => {
                shutdown.cancel();
                error!(error = %e, "Load run failed");
                Err(e)
            }
        }
    }
}

/// Unwrap a joined task's result.
fn joined<T>(result: Result<Result<T, PipelineError>, JoinError>) -> Result<T, PipelineError> {
    result.context(TaskJoinSnafu)?
}
