//! Newline-delimited JSON file writer.

use object_store::PutPayload;
use object_store::path::Path;
use serde_json::Value;
use snafu::ResultExt;
use tracing::debug;

use drift_core::emit;
use drift_core::metrics::events::{FilesWritten, RowsWritten};

use super::FileResult;
use crate::context::LoadContext;
use crate::destination::DestinationKey;
use crate::error::{EncodeSnafu, PersistSnafu, WriteError};

/// Buffers rows of one destination and persists them as one staged file.
pub struct RowFileWriter {
    destination: DestinationKey,
    path: Path,
    buffer: Vec<u8>,
    rows: u64,
}

impl RowFileWriter {
    pub fn new(ctx: &LoadContext, destination: DestinationKey) -> Self {
        Self {
            destination,
            path: ctx.new_file_path(),
            buffer: Vec::new(),
            rows: 0,
        }
    }

    pub fn destination(&self) -> &DestinationKey {
        &self.destination
    }

    /// Bytes written so far.
    pub fn byte_size(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn row_count(&self) -> u64 {
        self.rows
    }

    pub fn write(&mut self, row: &Value) -> Result<(), WriteError> {
        serde_json::to_writer(&mut self.buffer, row).context(EncodeSnafu {
            destination: self.destination.as_str(),
        })?;
        self.buffer.push(b'\n');
        self.rows += 1;
        Ok(())
    }

    /// Whether the next row should go to a fresh file.
    pub fn is_full(&self, max_file_size: u64) -> bool {
        self.rows > 0 && self.byte_size() >= max_file_size
    }

    /// Persist the file and describe it.
    pub async fn close(self, ctx: &LoadContext) -> Result<FileResult, WriteError> {
        let size = self.byte_size();
        ctx.storage
            .put_payload(&self.path, PutPayload::from(self.buffer))
            .await
            .context(PersistSnafu {
                path: self.path.to_string(),
            })?;

        debug!(
            target = %self.destination,
            file = %self.path,
            rows = self.rows,
            bytes = size,
            "Closed staged file"
        );
        emit!(RowsWritten {
            count: self.rows,
            target: self.destination.to_string(),
        });
        emit!(FilesWritten {
            count: 1,
            bytes: size,
            target: self.destination.to_string(),
        });

        Ok(FileResult {
            filename: self.path,
            size,
            destination: self.destination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JobIdToken;
    use drift_core::StorageProvider;
    use serde_json::json;
    use std::sync::Arc;

    async fn ctx() -> LoadContext {
        let storage = Arc::new(StorageProvider::for_url("memory://").await.unwrap());
        LoadContext::new(JobIdToken::new("tok"), storage)
    }

    #[tokio::test]
    async fn test_write_and_close() {
        let ctx = ctx().await;
        let mut writer = RowFileWriter::new(&ctx, DestinationKey::new("dataset.events"));
        writer.write(&json!({"id": 1})).unwrap();
        writer.write(&json!({"id": 2})).unwrap();
        assert_eq!(writer.row_count(), 2);

        let result = writer.close(&ctx).await.unwrap();
        let contents = ctx.storage.get(&result.filename).await.unwrap();
        assert_eq!(&contents[..], b"{\"id\":1}\n{\"id\":2}\n");
        assert_eq!(result.size, contents.len() as u64);
        assert_eq!(result.destination, DestinationKey::new("dataset.events"));
        assert!(result.filename.prefix_matches(&ctx.temp_prefix));
    }

    #[tokio::test]
    async fn test_is_full() {
        let ctx = ctx().await;
        let mut writer = RowFileWriter::new(&ctx, DestinationKey::new("dataset.events"));
        assert!(!writer.is_full(0));
        writer.write(&json!({"id": 1})).unwrap();
        assert!(writer.is_full(9));
        assert!(!writer.is_full(10));
    }
}
