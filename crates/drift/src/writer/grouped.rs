//! Writer for rows already grouped by sharded key.

use serde_json::Value;

use super::{FileResult, RowFileWriter};
use crate::context::LoadContext;
use crate::destination::ShardedKey;
use crate::error::WriteError;

/// Write one group of rows, keeping a single file open at a time.
pub async fn write_grouped(
    ctx: &LoadContext,
    key: &ShardedKey,
    rows: impl IntoIterator<Item = Value>,
    max_file_size: u64,
) -> Result<Vec<FileResult>, WriteError> {
    let mut files = Vec::new();
    let mut writer = RowFileWriter::new(ctx, key.destination.clone());

    for row in rows {
        if writer.is_full(max_file_size) {
            let full = std::mem::replace(&mut writer, RowFileWriter::new(ctx, key.destination.clone()));
            files.push(full.close(ctx).await?);
        }
        writer.write(&row)?;
    }

    if writer.row_count() > 0 {
        files.push(writer.close(ctx).await?);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobIdToken;
    use crate::destination::DestinationKey;
    use drift_core::StorageProvider;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_grouped_rolls_files() {
        let storage = Arc::new(StorageProvider::for_url("memory://").await.unwrap());
        let ctx = LoadContext::new(JobIdToken::new("tok"), storage);
        let key = ShardedKey::new(DestinationKey::new("d.a"), 3);

        let rows = (0..5).map(|id| json!({"id": id}));
        let files = write_grouped(&ctx, &key, rows, 18).await.unwrap();

        // Each row encodes to 9 bytes, so files roll after two rows.
        assert_eq!(files.len(), 3);
        assert_eq!(files.iter().map(|f| f.size).sum::<u64>(), 45);
        assert!(files.iter().all(|f| f.destination == key.destination));
    }

    #[tokio::test]
    async fn test_write_grouped_empty() {
        let storage = Arc::new(StorageProvider::for_url("memory://").await.unwrap());
        let ctx = LoadContext::new(JobIdToken::new("tok"), storage);
        let key = ShardedKey::new(DestinationKey::new("d.a"), 0);

        let files = write_grouped(&ctx, &key, Vec::new(), 18).await.unwrap();
        assert!(files.is_empty());
    }
}
