//! Loads partitions into tables through load jobs.

use futures::future::join_all;
use snafu::prelude::*;
use tracing::{debug, warn};

use drift_core::metrics::events::JobKind;

use crate::config::Dispositions;
use crate::context::LoadContextRef;
use crate::destination::{DestinationKey, TableRef};
use crate::error::{LoadError, TableSnafu};
use crate::job::{JobRunner, job_id_prefix, load_job_id};
use crate::partition::Partition;
use crate::store::{JobConfiguration, JobSpec};

/// A temp table holding one staged partition, waiting to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempTable {
    pub destination: DestinationKey,
    pub partition_index: usize,
    pub table: TableRef,
}

/// Submits and awaits the load job of a partition.
#[derive(Clone)]
pub struct TableLoader {
    runner: JobRunner,
    ctx: LoadContextRef,
}

impl TableLoader {
    pub fn new(runner: JobRunner, ctx: LoadContextRef) -> Self {
        Self { runner, ctx }
    }

    /// Load a partition straight into its final table.
    pub async fn load_direct(
        &self,
        partition: &Partition,
        dispositions: Dispositions,
    ) -> Result<(), LoadError> {
        let prefix = self.prefix(partition);
        let table = partition
            .destination
            .table()
            .context(TableSnafu { job_id: &prefix })?;

        self.load(partition, &prefix, table, dispositions).await
    }

    /// Load a partition into a fresh temp table next to its final table.
    ///
    /// The temp table is named after the job id prefix, so a redelivered
    /// partition targets the same table.
    pub async fn load_staged(&self, partition: &Partition) -> Result<TempTable, LoadError> {
        let prefix = self.prefix(partition);
        let table = partition
            .destination
            .table()
            .context(TableSnafu { job_id: &prefix })?
            .sibling(&prefix);

        self.load(partition, &prefix, table.clone(), Dispositions::STAGED)
            .await?;

        Ok(TempTable {
            destination: partition.destination.clone(),
            partition_index: partition.index,
            table,
        })
    }

    fn prefix(&self, partition: &Partition) -> String {
        job_id_prefix(
            &self.ctx.token,
            &partition.destination,
            partition.pane,
            partition.index,
        )
    }

    async fn load(
        &self,
        partition: &Partition,
        prefix: &str,
        table: TableRef,
        dispositions: Dispositions,
    ) -> Result<(), LoadError> {
        let source_files: Vec<_> = partition.files.iter().map(|f| f.filename.clone()).collect();

        debug!(
            target = %partition.destination,
            table = %table,
            files = source_files.len(),
            bytes = partition.byte_size,
            write_disposition = %dispositions.write,
            create_disposition = %dispositions.create,
            "Loading partition"
        );

        self.runner
            .run(JobKind::Load, &partition.destination, |retry| JobSpec {
                job_id: load_job_id(prefix, retry),
                configuration: JobConfiguration::Load {
                    source_files: source_files.clone(),
                    destination: table.clone(),
                },
                dispositions,
            })
            .await?;

        self.remove_files(partition).await;
        Ok(())
    }

    /// Delete the partition's staged files. Failures are logged only.
    async fn remove_files(&self, partition: &Partition) {
        let results = join_all(
            partition
                .files
                .iter()
                .map(|file| self.ctx.storage.delete(&file.filename)),
        )
        .await;

        for (file, result) in partition.files.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    target = %partition.destination,
                    file = %file.filename,
                    error = %e,
                    "Failed to remove staged file"
                );
            }
        }
    }
}
