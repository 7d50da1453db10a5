//! Per-bundle writers for dynamic sharding.

use futures::future::try_join_all;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use drift_core::emit;
use drift_core::metrics::events::RowsSpilled;

use super::{FileResult, RowFileWriter};
use crate::context::LoadContext;
use crate::destination::{DestinationKey, ShardedKey};
use crate::error::WriteError;
use crate::shard::{SPILLED_RECORD_SHARDING_FACTOR, ShardAssigner};

/// What a bundle produced: files written inline and rows left for the grouped path.
#[derive(Debug, Default)]
pub struct BundleOutput {
    pub files: Vec<FileResult>,
    pub spilled: Vec<(ShardedKey, Value)>,
    /// Destinations that got an inline writer.
    pub inline_destinations: usize,
    /// Destinations with at least one spilled row.
    pub spilled_destinations: usize,
}

/// Writes a bundle's rows straight to per-destination files.
///
/// At most `max_writers` files are open at once. Rows for any further
/// destination are keyed by a spill shard and returned instead of written.
pub struct BundleWriter<'a> {
    ctx: &'a LoadContext,
    max_writers: usize,
    max_file_size: u64,
    writers: IndexMap<DestinationKey, RowFileWriter>,
    files: Vec<FileResult>,
    spilled: Vec<(ShardedKey, Value)>,
    spilled_counts: IndexMap<DestinationKey, u64>,
    spill_shards: ShardAssigner,
}

impl<'a> BundleWriter<'a> {
    pub fn new(ctx: &'a LoadContext, max_writers: usize, max_file_size: u64) -> Self {
        Self {
            ctx,
            max_writers,
            max_file_size,
            writers: IndexMap::new(),
            files: Vec::new(),
            spilled: Vec::new(),
            spilled_counts: IndexMap::new(),
            spill_shards: ShardAssigner::new(SPILLED_RECORD_SHARDING_FACTOR),
        }
    }

    pub async fn write(&mut self, destination: DestinationKey, row: Value) -> Result<(), WriteError> {
        if !self.writers.contains_key(&destination) && self.writers.len() >= self.max_writers {
            *self.spilled_counts.entry(destination.clone()).or_default() += 1;
            let key = self.spill_shards.assign(destination);
            self.spilled.push((key, row));
            return Ok(());
        }

        let ctx = self.ctx;
        let writer = self
            .writers
            .entry(destination)
            .or_insert_with_key(|destination| RowFileWriter::new(ctx, destination.clone()));

        if writer.is_full(self.max_file_size) {
            let fresh = RowFileWriter::new(ctx, writer.destination().clone());
            let full = std::mem::replace(writer, fresh);
            self.files.push(full.close(ctx).await?);
        }
        writer.write(&row)
    }

    /// Close every open file.
    pub async fn finish(self) -> Result<BundleOutput, WriteError> {
        let ctx = self.ctx;
        let inline_destinations = self.writers.len();

        let mut files = self.files;
        files.extend(
            try_join_all(self.writers.into_values().map(|writer| writer.close(ctx))).await?,
        );

        for (destination, count) in &self.spilled_counts {
            emit!(RowsSpilled {
                count: *count,
                target: destination.to_string(),
            });
        }

        debug!(
            files = files.len(),
            inline_destinations,
            spilled_destinations = self.spilled_counts.len(),
            spilled_rows = self.spilled.len(),
            "Bundle finished"
        );

        Ok(BundleOutput {
            files,
            spilled: self.spilled,
            inline_destinations,
            spilled_destinations: self.spilled_counts.len(),
        })
    }
}
