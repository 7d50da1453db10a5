//! File-write stage: bundles of rows to staged files.

use indexmap::IndexMap;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::debug;

use super::{KeyedRow, LoadStats, joined};
use crate::context::LoadContextRef;
use crate::destination::ShardedKey;
use crate::error::PipelineError;
use crate::shard::ShardAssigner;
use crate::writer::{BundleWriter, FileResult, write_grouped};

/// What one bundle produced.
#[derive(Debug, Default)]
pub(super) struct BundleResult {
    /// Files written inline.
    pub files: Vec<FileResult>,
    /// Rows to be grouped by key before writing.
    pub keyed: Vec<(ShardedKey, Value)>,
    pub inline_destinations: usize,
    pub spilled_destinations: usize,
}

/// Dynamic sharding: write inline up to the writer budget, key the rest.
pub(super) async fn write_bundle(
    ctx: LoadContextRef,
    rows: Vec<KeyedRow>,
    max_writers: usize,
    max_file_size: u64,
) -> Result<BundleResult, PipelineError> {
    let mut writer = BundleWriter::new(&ctx, max_writers, max_file_size);
    for KeyedRow { destination, row } in rows {
        writer.write(destination, row).await?;
    }
    let output = writer.finish().await?;

    Ok(BundleResult {
        files: output.files,
        keyed: output.spilled,
        inline_destinations: output.inline_destinations,
        spilled_destinations: output.spilled_destinations,
    })
}

/// Static sharding: key every row of a bundle by the bundle's own assigner.
pub(super) fn shard_bundle(rows: Vec<KeyedRow>, num_shards: u32) -> BundleResult {
    let mut assigner = ShardAssigner::new(num_shards);
    let keyed = rows
        .into_iter()
        .map(|KeyedRow { destination, row }| (assigner.assign(destination), row))
        .collect();

    BundleResult {
        keyed,
        ..BundleResult::default()
    }
}

/// Group keyed rows across bundles and write each group to its own files.
///
/// Groups are written concurrently, each keeping one file open at a time.
pub(super) async fn write_groups(
    ctx: &LoadContextRef,
    keyed: Vec<(ShardedKey, Value)>,
    max_file_size: u64,
) -> Result<Vec<FileResult>, PipelineError> {
    let mut groups: IndexMap<ShardedKey, Vec<Value>> = IndexMap::new();
    for (key, row) in keyed {
        groups.entry(key).or_default().push(row);
    }
    debug!(groups = groups.len(), "Writing grouped rows");

    let mut tasks = JoinSet::new();
    for (key, rows) in groups {
        let ctx = ctx.clone();
        tasks.spawn(async move {
            write_grouped(&ctx, &key, rows, max_file_size)
                .await
                .map_err(PipelineError::from)
        });
    }

    let mut files = Vec::new();
    while let Some(result) = tasks.join_next().await {
        files.extend(joined(result)?);
    }
    Ok(files)
}

/// Collect bundle results, then write every keyed row.
pub(super) async fn finish_bundles(
    ctx: &LoadContextRef,
    bundles: Vec<BundleResult>,
    max_file_size: u64,
) -> Result<(Vec<FileResult>, LoadStats), PipelineError> {
    let mut stats = LoadStats::default();
    let mut files = Vec::new();
    let mut keyed = Vec::new();

    for bundle in bundles {
        stats.inline_destinations += bundle.inline_destinations;
        stats.spilled_destinations += bundle.spilled_destinations;
        files.extend(bundle.files);
        keyed.extend(bundle.keyed);
    }

    files.extend(write_groups(ctx, keyed, max_file_size).await?);
    stats.files_written = files.len();
    Ok((files, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{JobIdToken, LoadContext};
    use drift_core::StorageProvider;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_shard_bundle_covers_every_row() {
        let rows: Vec<KeyedRow> = (0..100)
            .map(|i| KeyedRow::new("d.t", json!({"id": i})))
            .collect();
        let result = shard_bundle(rows, 4);

        assert_eq!(result.keyed.len(), 100);
        assert!(result.files.is_empty());
        let shards: HashSet<u32> = result.keyed.iter().map(|(key, _)| key.shard).collect();
        assert_eq!(shards, HashSet::from([0, 1, 2, 3]));
    }

    #[tokio::test]
    async fn test_write_groups_one_lineage_per_key() {
        let storage = Arc::new(StorageProvider::for_url("memory://").await.unwrap());
        let ctx = Arc::new(LoadContext::new(JobIdToken::new("tok"), storage));

        let rows: Vec<KeyedRow> = (0..40)
            .map(|i| KeyedRow::new(if i % 2 == 0 { "d.a" } else { "d.b" }, json!(i)))
            .collect();
        let bundle = shard_bundle(rows, 3);
        let (files, stats) = finish_bundles(&ctx, vec![bundle], u64::MAX).await.unwrap();

        // Three shards per destination, one file each.
        assert_eq!(files.len(), 6);
        assert_eq!(stats.files_written, 6);
    }
}
