//! Commits a destination's temp tables into its final table.

use snafu::prelude::*;
use tracing::{info, warn};

use drift_core::emit;
use drift_core::metrics::events::{JobKind, TempTablesCommitted};

use crate::config::Dispositions;
use crate::context::LoadContextRef;
use crate::destination::DestinationKey;
use crate::error::{LoadError, TableSnafu};
use crate::job::{JobRunner, copy_job_id};
use crate::loader::TempTable;
use crate::store::{JobConfiguration, JobSpec};

/// Merges temp tables into the final table with one copy job, then drops them.
///
/// Committing again after a crash resubmits the same copy job id, and
/// dropping a temp table that is already gone succeeds, so the step can be
/// re-run safely.
#[derive(Clone)]
pub struct TableCommitter {
    runner: JobRunner,
    ctx: LoadContextRef,
}

impl TableCommitter {
    pub fn new(runner: JobRunner, ctx: LoadContextRef) -> Self {
        Self { runner, ctx }
    }

    pub async fn commit(
        &self,
        destination: &DestinationKey,
        pane: u64,
        temp_tables: &[TempTable],
        dispositions: Dispositions,
    ) -> Result<(), LoadError> {
        let token = &self.ctx.token;
        let final_table = destination.table().context(TableSnafu {
            job_id: copy_job_id(token, destination, pane, 0),
        })?;

        let mut ordered: Vec<&TempTable> = temp_tables.iter().collect();
        ordered.sort_by_key(|temp| temp.partition_index);
        let source_tables: Vec<_> = ordered.iter().map(|temp| temp.table.clone()).collect();

        let job_id = self
            .runner
            .run(JobKind::Copy, destination, |retry| JobSpec {
                job_id: copy_job_id(token, destination, pane, retry),
                configuration: JobConfiguration::Copy {
                    source_tables: source_tables.clone(),
                    destination: final_table.clone(),
                },
                dispositions,
            })
            .await?;

        info!(
            target = %destination,
            job_id = %job_id,
            temp_tables = source_tables.len(),
            pane,
            "Committed temp tables"
        );
        emit!(TempTablesCommitted {
            count: source_tables.len() as u64,
            target: destination.to_string(),
        });

        for table in &source_tables {
            if let Err(e) = self.runner.store().delete_table(table).await {
                warn!(target = %destination, table = %table, error = %e, "Failed to drop temp table");
            }
        }

        Ok(())
    }
}
