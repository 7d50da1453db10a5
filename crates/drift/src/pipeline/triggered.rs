//! Triggered control path: write and load in panes.
//!
//! Rows are sharded statically as they arrive and buffered per sharded key.
//! A key's write pane fires on the triggering frequency since its first
//! buffered row or on the record count, whichever comes first, and its rows
//! are written to files. Files are buffered again per destination into load
//! panes firing on the frequency alone. Load panes of one destination run one
//! after another, so its first load keeps the configured dispositions and
//! every later one appends. Destinations load independently of each other.

use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use serde_json::Value;
use snafu::ResultExt;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use super::pane::load_pane;
use super::{KeyedRow, LoadStats, RunEnv, joined};
use crate::config::Dispositions;
use crate::destination::{DestinationKey, ShardedKey};
use crate::error::{PipelineError, TaskJoinSnafu};
use crate::shard::ShardAssigner;
use crate::trigger::{Pane, PaneBuffer, TriggerPolicy};
use crate::writer::{FileResult, write_grouped};

type WriteTask = Result<Vec<FileResult>, PipelineError>;
type LoadTask = (DestinationKey, Result<LoadStats, PipelineError>);

pub(super) async fn run<S>(
    env: RunEnv,
    mut input: S,
    frequency: Duration,
) -> Result<LoadStats, PipelineError>
where
    S: Stream<Item = KeyedRow> + Send + Unpin,
{
    let config = env.config.clone();
    let write_policy =
        TriggerPolicy::frequency_or_count(frequency, config.file_triggering_record_count);
    let mut shards = ShardAssigner::new(config.num_file_shards);
    let mut rows: IndexMap<ShardedKey, PaneBuffer<Value>> = IndexMap::new();
    let mut writes: JoinSet<WriteTask> = JoinSet::new();
    let mut loads = LoadPanes::new(env.clone(), frequency, config.dispositions());
    let mut stats = LoadStats::default();
    let mut input_done = false;

    info!(frequency_secs = frequency.as_secs(), "Triggered load run started");

    loop {
        if input_done && rows.is_empty() && writes.is_empty() && loads.is_idle() {
            break;
        }

        let write_deadline = rows.values().filter_map(PaneBuffer::deadline).min();
        let load_deadline = loads.deadline();

        tokio::select! {
            biased;

            _ = env.shutdown.cancelled() => return Err(PipelineError::Shutdown),

            Some(result) = writes.join_next(), if !writes.is_empty() => {
                let written = joined(result)?;
                stats.files_written += written.len();
                loads.extend(written, Instant::now());
                if input_done && writes.is_empty() {
                    loads.drain();
                }
            }

            Some(result) = loads.tasks.join_next(), if !loads.tasks.is_empty() => {
                let (destination, pane_stats) = result.context(TaskJoinSnafu)?;
                stats.merge(pane_stats?);
                loads.finished(&destination);
            }

            _ = sleep_until_opt(write_deadline) => {
                let now = Instant::now();
                let fired: Vec<(ShardedKey, Pane<Value>)> = rows
                    .iter_mut()
                    .filter_map(|(key, buffer)| buffer.poll_timer(now).map(|pane| (key.clone(), pane)))
                    .collect();
                rows.retain(|_, buffer| !buffer.is_empty());
                for (key, pane) in fired {
                    spawn_write(&mut writes, &env, key, pane);
                }
            }

            _ = sleep_until_opt(load_deadline) => loads.poll_timers(Instant::now()),

            row = input.next(), if !input_done => match row {
                Some(KeyedRow { destination, row }) => {
                    let key = shards.assign(destination);
                    let fired = rows
                        .entry(key.clone())
                        .or_insert_with(|| PaneBuffer::new("write", write_policy))
                        .push(row, Instant::now());
                    if let Some(pane) = fired {
                        rows.swap_remove(&key);
                        spawn_write(&mut writes, &env, key, pane);
                    }
                }
                None => {
                    input_done = true;
                    debug!(keys = rows.len(), "Input exhausted, draining panes");
                    for (key, mut buffer) in rows.drain(..) {
                        if let Some(pane) = buffer.drain() {
                            spawn_write(&mut writes, &env, key, pane);
                        }
                    }
                    if writes.is_empty() {
                        loads.drain();
                    }
                }
            },
        }
    }

    if config.singleton_table
        && let Some(table) = &config.default_destination
        && !loads.has_loaded(&DestinationKey::new(table.as_str()))
    {
        info!(target = %table, "Default destination never loaded, creating it");
        let dispositions = config.dispositions();
        stats.merge(load_pane(&env, 0, Vec::new(), true, |_| dispositions).await?);
    }

    Ok(stats)
}

/// Write one sharded key's pane of rows to files.
fn spawn_write(writes: &mut JoinSet<WriteTask>, env: &RunEnv, key: ShardedKey, pane: Pane<Value>) {
    let ctx = env.ctx.clone();
    let max_file_size = env.config.max_file_size;
    debug!(
        target = %key.destination,
        shard = key.shard,
        rows = pane.elements.len(),
        reason = pane.reason.as_str(),
        "Write pane fired"
    );

    writes.spawn(async move {
        write_grouped(&ctx, &key, pane.elements, max_file_size)
            .await
            .map_err(PipelineError::from)
    });
}

/// Load pane state of one destination.
struct DestinationLoads {
    buffer: PaneBuffer<FileResult>,
    queued: VecDeque<Pane<FileResult>>,
    running: bool,
    /// A pane of this destination was started before.
    loaded: bool,
}

/// Per-destination load panes. Each destination runs one pane at a time.
struct LoadPanes {
    env: RunEnv,
    policy: TriggerPolicy,
    dispositions: Dispositions,
    destinations: IndexMap<DestinationKey, DestinationLoads>,
    tasks: JoinSet<LoadTask>,
}

impl LoadPanes {
    fn new(env: RunEnv, frequency: Duration, dispositions: Dispositions) -> Self {
        Self {
            env,
            policy: TriggerPolicy::frequency(frequency),
            dispositions,
            destinations: IndexMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.tasks.is_empty()
            && self
                .destinations
                .values()
                .all(|state| state.buffer.is_empty() && state.queued.is_empty())
    }

    fn has_loaded(&self, destination: &DestinationKey) -> bool {
        self.destinations
            .get(destination)
            .is_some_and(|state| state.loaded)
    }

    /// Earliest load pane deadline over all destinations.
    fn deadline(&self) -> Option<Instant> {
        self.destinations
            .values()
            .filter_map(|state| state.buffer.deadline())
            .min()
    }

    /// Buffer freshly written files with their destinations.
    fn extend(&mut self, files: Vec<FileResult>, now: Instant) {
        let mut fired = Vec::new();
        for file in files {
            let destination = file.destination.clone();
            let policy = self.policy;
            let state = self
                .destinations
                .entry(destination.clone())
                .or_insert_with(|| DestinationLoads {
                    buffer: PaneBuffer::new("load", policy),
                    queued: VecDeque::new(),
                    running: false,
                    loaded: false,
                });
            if let Some(pane) = state.buffer.push(file, now) {
                fired.push((destination, pane));
            }
        }
        self.enqueue_all(fired);
    }

    fn poll_timers(&mut self, now: Instant) {
        let fired: Vec<_> = self
            .destinations
            .iter_mut()
            .filter_map(|(destination, state)| {
                state.buffer.poll_timer(now).map(|pane| (destination.clone(), pane))
            })
            .collect();
        self.enqueue_all(fired);
    }

    /// Release every buffered file, e.g. once no more files can arrive.
    fn drain(&mut self) {
        let fired: Vec<_> = self
            .destinations
            .iter_mut()
            .filter_map(|(destination, state)| {
                state.buffer.drain().map(|pane| (destination.clone(), pane))
            })
            .collect();
        self.enqueue_all(fired);
    }

    fn finished(&mut self, destination: &DestinationKey) {
        if let Some(state) = self.destinations.get_mut(destination) {
            state.running = false;
        }
        self.start_next(destination);
    }

    fn enqueue_all(&mut self, fired: Vec<(DestinationKey, Pane<FileResult>)>) {
        for (destination, pane) in fired {
            debug!(
                target = %destination,
                pane = pane.index,
                files = pane.elements.len(),
                reason = pane.reason.as_str(),
                "Load pane fired"
            );
            if let Some(state) = self.destinations.get_mut(&destination) {
                state.queued.push_back(pane);
            }
            self.start_next(&destination);
        }
    }

    fn start_next(&mut self, destination: &DestinationKey) {
        let Some(state) = self.destinations.get_mut(destination) else {
            return;
        };
        if state.running {
            return;
        }
        let Some(pane) = state.queued.pop_front() else {
            return;
        };

        let dispositions = if state.loaded {
            self.dispositions.appending()
        } else {
            self.dispositions
        };
        state.running = true;
        state.loaded = true;

        let env = self.env.clone();
        let destination = destination.clone();
        self.tasks.spawn(async move {
            let result = load_pane(&env, pane.index, pane.elements, false, |_| dispositions).await;
            (destination, result)
        });
    }
}

/// Sleep until `deadline`, or forever without one.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
