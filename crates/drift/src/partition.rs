//! Packing staged files into load-job sized partitions.

use tracing::debug;

use drift_core::emit;
use drift_core::metrics::events::{PartitionKind, PartitionsCreated};

use crate::config::PartitionLimits;
use crate::destination::DestinationKey;
use crate::writer::FileResult;

/// How a partition reaches its final table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTag {
    /// The only partition of its destination; loaded into the final table.
    Direct,
    /// One of several; loaded into a temp table and committed later.
    Staged,
}

impl From<PartitionTag> for PartitionKind {
    fn from(tag: PartitionTag) -> Self {
        match tag {
            PartitionTag::Direct => PartitionKind::Direct,
            PartitionTag::Staged => PartitionKind::Staged,
        }
    }
}

/// Files of one destination that a single load job references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub destination: DestinationKey,
    /// Pane the files were written in; always 0 for untriggered runs.
    pub pane: u64,
    /// Position among the destination's partitions in this pane.
    pub index: usize,
    pub tag: PartitionTag,
    pub files: Vec<FileResult>,
    pub byte_size: u64,
}

impl Partition {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Greedily pack `files` of one destination into partitions within `limits`.
///
/// A new partition starts when the next file would push the current one past
/// either limit; a single file larger than `max_bytes` gets a partition of its
/// own. A lone partition is [`PartitionTag::Direct`] unless `singleton_table`
/// is set. With `singleton_table` and no files, one empty staged partition is
/// returned so the table still gets created.
pub fn partition_files(
    destination: &DestinationKey,
    pane: u64,
    files: Vec<FileResult>,
    limits: &PartitionLimits,
    singleton_table: bool,
) -> Vec<Partition> {
    let mut groups: Vec<(Vec<FileResult>, u64)> = Vec::new();
    let mut current: Vec<FileResult> = Vec::new();
    let mut current_bytes: u64 = 0;

    for file in files {
        let over_files = current.len() + 1 > limits.max_files;
        let over_bytes = current_bytes.saturating_add(file.size) > limits.max_bytes;
        if !current.is_empty() && (over_files || over_bytes) {
            groups.push((std::mem::take(&mut current), current_bytes));
            current_bytes = 0;
        }
        current_bytes = current_bytes.saturating_add(file.size);
        current.push(file);
    }
    if !current.is_empty() || (groups.is_empty() && singleton_table) {
        groups.push((current, current_bytes));
    }

    let tag = if groups.len() == 1 && !singleton_table {
        PartitionTag::Direct
    } else {
        PartitionTag::Staged
    };

    let partitions: Vec<Partition> = groups
        .into_iter()
        .enumerate()
        .map(|(index, (files, byte_size))| Partition {
            destination: destination.clone(),
            pane,
            index,
            tag,
            files,
            byte_size,
        })
        .collect();

    if !partitions.is_empty() {
        debug!(
            target = %destination,
            pane,
            partitions = partitions.len(),
            tag = ?tag,
            "Partitioned staged files"
        );
        emit!(PartitionsCreated {
            count: partitions.len() as u64,
            kind: tag.into(),
            target: destination.to_string(),
        });
    }

    partitions
}
