//! Untriggered control path: write everything, then load once.
//!
//! At most `max_concurrent_bundles` bundles run at a time; the input is not
//! pulled further until one of them finishes. Rows handed to the grouped
//! path are still held until every bundle is done, since grouping needs
//! the whole input.

use futures::{Stream, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::pane::load_pane;
use super::write::{BundleResult, finish_bundles, shard_bundle, write_bundle};
use super::{KeyedRow, LoadStats, RunEnv, joined};
use crate::error::PipelineError;

pub(super) async fn run<S>(env: RunEnv, input: S) -> Result<LoadStats, PipelineError>
where
    S: Stream<Item = KeyedRow> + Send + Unpin,
{
    let config = env.config.clone();
    let mut chunks = input.chunks(config.bundle_size);
    let mut bundles: JoinSet<Result<BundleResult, PipelineError>> = JoinSet::new();
    let mut results = Vec::new();

    loop {
        if bundles.len() >= config.max_concurrent_bundles {
            tokio::select! {
                biased;

                _ = env.shutdown.cancelled() => return Err(PipelineError::Shutdown),
                Some(result) = bundles.join_next() => results.push(joined(result)?),
            }
            continue;
        }

        let rows = tokio::select! {
            biased;

            _ = env.shutdown.cancelled() => return Err(PipelineError::Shutdown),
            rows = chunks.next() => match rows {
                Some(rows) => rows,
                None => break,
            },
        };

        debug!(rows = rows.len(), bundle = bundles.len(), "Spawning bundle");
        let ctx = env.ctx.clone();
        let config = config.clone();
        bundles.spawn(async move {
            if config.num_file_shards == 0 {
                write_bundle(
                    ctx,
                    rows,
                    config.max_num_writers_per_bundle,
                    config.max_file_size,
                )
                .await
            } else {
                Ok(shard_bundle(rows, config.num_file_shards))
            }
        });
    }

    loop {
        tokio::select! {
            biased;

            _ = env.shutdown.cancelled() => return Err(PipelineError::Shutdown),
            result = bundles.join_next() => match result {
                Some(result) => results.push(joined(result)?),
                None => break,
            },
        }
    }

    let bundle_count = results.len();
    let (files, mut stats) = finish_bundles(&env.ctx, results, config.max_file_size).await?;
    info!(
        bundles = bundle_count,
        files = files.len(),
        "All staged files written"
    );

    let dispositions = config.dispositions();
    let pane = load_pane(&env, 0, files, config.singleton_table, |_| dispositions).await?;
    stats.merge(pane);
    Ok(stats)
}
