//! Staged file writers.
//!
//! - `row`: a single newline-delimited JSON file that rolls at a size limit
//! - `bundle`: per-bundle writers with a budget of open files, spilling the rest
//! - `grouped`: writes one grouped shard of rows, one file at a time

mod bundle;
mod grouped;
mod row;

use object_store::path::Path;

pub use bundle::{BundleOutput, BundleWriter};
pub use grouped::write_grouped;
pub use row::RowFileWriter;

use crate::destination::DestinationKey;

/// A staged file persisted to temp storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    /// Location relative to the temp storage root.
    pub filename: Path,
    /// Size in bytes.
    pub size: u64,
    pub destination: DestinationKey,
}
