//! The load stages a partition goes through, dispatched by partition tag.
//!
//! Per destination the flow is `WRITING_FILES -> PARTITIONING`, then either
//! `DIRECT_LOAD -> DONE` or `STAGED_LOAD -> COMMIT -> DONE`.

use snafu::prelude::*;

use crate::committer::TableCommitter;
use crate::config::Dispositions;
use crate::destination::DestinationKey;
use crate::error::{CommitSnafu, LoadSnafu, PipelineError};
use crate::loader::{TableLoader, TempTable};
use crate::partition::{Partition, PartitionTag};

/// One unit of load work.
#[derive(Debug, Clone)]
pub enum Stage {
    /// Load the only partition of a destination into the final table.
    DirectLoad {
        partition: Partition,
        dispositions: Dispositions,
    },
    /// Load one of several partitions into a temp table.
    StagedLoad { partition: Partition },
    /// Merge a destination's temp tables into the final table.
    Commit {
        destination: DestinationKey,
        pane: u64,
        temp_tables: Vec<TempTable>,
        dispositions: Dispositions,
    },
}

/// What a finished stage hands to the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    Loaded { destination: DestinationKey },
    Staged(TempTable),
    Committed {
        destination: DestinationKey,
        temp_tables: usize,
    },
}

impl Stage {
    /// The load stage for a partition, chosen by its tag.
    ///
    /// `dispositions` are the final table's; staged loads ignore them.
    pub fn for_partition(partition: Partition, dispositions: Dispositions) -> Self {
        match partition.tag {
            PartitionTag::Direct => Stage::DirectLoad {
                partition,
                dispositions,
            },
            PartitionTag::Staged => Stage::StagedLoad { partition },
        }
    }

    pub fn destination(&self) -> &DestinationKey {
        match self {
            Stage::DirectLoad { partition, .. } | Stage::StagedLoad { partition } => {
                &partition.destination
            }
            Stage::Commit { destination, .. } => destination,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::DirectLoad { .. } => "DIRECT_LOAD",
            Stage::StagedLoad { .. } => "STAGED_LOAD",
            Stage::Commit { .. } => "COMMIT",
        }
    }
}

/// Runs stages against the loader and committer.
#[derive(Clone)]
pub struct StageExecutor {
    loader: TableLoader,
    committer: TableCommitter,
}

impl StageExecutor {
    pub fn new(loader: TableLoader, committer: TableCommitter) -> Self {
        Self { loader, committer }
    }

    pub async fn execute(&self, stage: Stage) -> Result<StageOutput, PipelineError> {
        match stage {
            Stage::DirectLoad {
                partition,
                dispositions,
            } => {
                self.loader
                    .load_direct(&partition, dispositions)
                    .await
                    .context(LoadSnafu {
                        destination: partition.destination.as_str(),
                    })?;
                Ok(StageOutput::Loaded {
                    destination: partition.destination,
                })
            }
            Stage::StagedLoad { partition } => {
                let temp = self
                    .loader
                    .load_staged(&partition)
                    .await
                    .context(LoadSnafu {
                        destination: partition.destination.as_str(),
                    })?;
                Ok(StageOutput::Staged(temp))
            }
            Stage::Commit {
                destination,
                pane,
                temp_tables,
                dispositions,
            } => {
                self.committer
                    .commit(&destination, pane, &temp_tables, dispositions)
                    .await
                    .context(CommitSnafu {
                        destination: destination.as_str(),
                    })?;
                Ok(StageOutput::Committed {
                    destination,
                    temp_tables: temp_tables.len(),
                })
            }
        }
    }
}
