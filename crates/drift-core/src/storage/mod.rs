//! Storage abstraction over object stores.
//!
//! Staged files are written to, read from and deleted through a
//! [`StorageProvider`], which hides whether the temp location lives on S3, GCS,
//! the local filesystem or in memory.

mod cloud;
mod local;
mod url_parser;

pub use cloud::{GcsConfig, S3Config};
pub use local::{LocalConfig, MemoryConfig};
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider that abstracts over different object store backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config),
            BackendConfig::Gcs(config) => Self::construct_gcs(config),
            BackendConfig::Local(config) => Self::construct_local(config).await,
            BackendConfig::Memory(config) => Ok(Self::construct_memory(config)),
        }
    }

    /// URL identifying the root of this provider, for logs.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let path = self.qualify_path(path);
        let result = match self.object_store.get(&path).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };
        record(StorageOperation::Get, result.is_ok(), start);

        result.context(ObjectStoreSnafu)
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let path = self.qualify_path(path);
        let result = self.object_store.put(&path, payload).await;
        record(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete a file. Deleting a missing file succeeds.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let path = self.qualify_path(path);
        let result = match self.object_store.delete(&path).await {
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            other => other,
        };
        record(StorageOperation::Delete, result.is_ok(), start);

        result.context(ObjectStoreSnafu)
    }

    /// List every file under `prefix` (relative to the configured key prefix).
    ///
    /// Returned paths are relative to the configured key prefix, so they can be
    /// handed straight back to [`get`](Self::get) or [`delete`](Self::delete).
    pub async fn list_with_prefix(&self, prefix: &str) -> Result<Vec<Path>, StorageError> {
        let start = Instant::now();
        let prefix = Path::from(prefix);
        let full_prefix = self.qualify_path(&prefix);
        let skip = self.config.key().map_or(0, |key| key.parts().count());

        let result: Result<Vec<Path>, _> = self
            .object_store
            .list(Some(full_prefix.as_ref()))
            .map_ok(|meta| meta.location.parts().skip(skip).collect())
            .try_collect()
            .await;
        record(StorageOperation::List, result.is_ok(), start);

        result.context(ObjectStoreSnafu)
    }
}

fn record(operation: StorageOperation, ok: bool, start: Instant) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest {
        operation,
        status,
        duration: start.elapsed(),
    });
}
