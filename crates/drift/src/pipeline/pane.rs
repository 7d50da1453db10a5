//! One load pane: partition the pane's files, load them, commit staged ones.

use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::task::JoinSet;
use tracing::{debug, info};

use drift_core::emit;
use drift_core::metrics::events::DestinationsInFlight;

use super::{LoadStats, RunEnv, joined};
use crate::config::Dispositions;
use crate::destination::DestinationKey;
use crate::error::PipelineError;
use crate::loader::TempTable;
use crate::partition::{PartitionTag, partition_files};
use crate::stage::{Stage, StageOutput};
use crate::writer::FileResult;

/// Staged loads still outstanding for a destination.
struct PendingCommit {
    remaining: usize,
    temp_tables: Vec<TempTable>,
    dispositions: Dispositions,
}

/// Outstanding stages per destination.
///
/// The gauge reports destinations, so a destination with many partitions
/// still counts once.
#[derive(Debug, Default)]
struct InFlight {
    stages: HashMap<DestinationKey, usize>,
}

impl InFlight {
    fn started(&mut self, destination: &DestinationKey) {
        *self.stages.entry(destination.clone()).or_default() += 1;
    }

    fn finished(&mut self, destination: &DestinationKey) {
        if let Some(count) = self.stages.get_mut(destination) {
            *count -= 1;
            if *count == 0 {
                self.stages.remove(destination);
            }
        }
    }

    fn destinations(&self) -> usize {
        self.stages.len()
    }
}

/// Partition, load and commit the files of one pane.
///
/// `dispositions_for` yields the final-table dispositions per destination.
/// With `ensure_default`, the configured default destination is loaded even
/// without files, so the table gets created.
pub(super) async fn load_pane(
    env: &RunEnv,
    pane: u64,
    files: Vec<FileResult>,
    ensure_default: bool,
    dispositions_for: impl Fn(&DestinationKey) -> Dispositions,
) -> Result<LoadStats, PipelineError> {
    let config = &env.config;
    let mut stats = LoadStats {
        panes: 1,
        ..LoadStats::default()
    };

    let mut by_destination: IndexMap<DestinationKey, Vec<FileResult>> = IndexMap::new();
    if ensure_default && let Some(table) = &config.default_destination {
        by_destination.insert(DestinationKey::new(table.as_str()), Vec::new());
    }
    for file in files {
        by_destination
            .entry(file.destination.clone())
            .or_default()
            .push(file);
    }

    let mut stages: JoinSet<Result<StageOutput, PipelineError>> = JoinSet::new();
    let mut pending: HashMap<DestinationKey, PendingCommit> = HashMap::new();
    let mut in_flight = InFlight::default();

    for (destination, files) in by_destination {
        let dispositions = dispositions_for(&destination);
        let partitions = partition_files(
            &destination,
            pane,
            files,
            &config.partition_limits,
            config.singleton_table,
        );
        stats.partitions += partitions.len();

        let staged = partitions
            .iter()
            .filter(|p| p.tag == PartitionTag::Staged)
            .count();
        if staged > 0 {
            pending.insert(
                destination.clone(),
                PendingCommit {
                    remaining: staged,
                    temp_tables: Vec::with_capacity(staged),
                    dispositions,
                },
            );
        }

        for partition in partitions {
            let stage = Stage::for_partition(partition, dispositions);
            spawn_stage(&mut stages, &mut in_flight, env, stage);
        }
    }

    info!(
        pane,
        partitions = stats.partitions,
        staged_destinations = pending.len(),
        "Loading pane"
    );

    emit!(DestinationsInFlight {
        count: in_flight.destinations()
    });
    while let Some(result) = stages.join_next().await {
        match joined(result)? {
            StageOutput::Loaded { destination } => {
                stats.direct_loads += 1;
                in_flight.finished(&destination);
                debug!(target = %destination, pane, "Direct load done");
            }
            StageOutput::Staged(temp) => {
                stats.temp_tables += 1;
                let destination = temp.destination.clone();
                if let Some(commit) = pending.get_mut(&destination) {
                    commit.temp_tables.push(temp);
                    commit.remaining -= 1;
                    if commit.remaining == 0
                        && let Some(commit) = pending.remove(&destination)
                    {
                        let stage = Stage::Commit {
                            destination: destination.clone(),
                            pane,
                            temp_tables: commit.temp_tables,
                            dispositions: commit.dispositions,
                        };
                        spawn_stage(&mut stages, &mut in_flight, env, stage);
                    }
                }
                in_flight.finished(&destination);
            }
            StageOutput::Committed {
                destination,
                temp_tables,
            } => {
                stats.commits += 1;
                in_flight.finished(&destination);
                debug!(target = %destination, pane, temp_tables, "Commit done");
            }
        }
        emit!(DestinationsInFlight {
            count: in_flight.destinations()
        });
    }

    Ok(stats)
}

fn spawn_stage(
    stages: &mut JoinSet<Result<StageOutput, PipelineError>>,
    in_flight: &mut InFlight,
    env: &RunEnv,
    stage: Stage,
) {
    in_flight.started(stage.destination());
    let executor = env.executor.clone();
    debug!(target = %stage.destination(), stage = stage.name(), "Scheduling stage");
    stages.spawn(async move { executor.execute(stage).await });
}
