//! Cloud bucket backends: S3 and GCS.
//!
//! Credentials come from the environment, as read by the object_store
//! builders. Staged files are small and written once, so the default retry
//! policy applies to every request.

use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GcsConfigSnafu, S3ConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// S3 temp location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// Alternative endpoint, e.g. a MinIO or LocalStack instance.
    pub endpoint: Option<String>,
    pub key: Option<Path>,
}

/// GCS temp location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    pub bucket: String,
    pub key: Option<Path>,
}

fn bucket_url(scheme: &str, bucket: &str, key: Option<&Path>) -> String {
    match key {
        Some(key) => format!("{scheme}://{bucket}/{key}"),
        None => format!("{scheme}://{bucket}"),
    }
}

impl StorageProvider {
    pub(super) fn construct_s3(config: S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint {
            debug!(%endpoint, bucket = %config.bucket, "S3 temp location with custom endpoint");
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);
        let canonical_url = bucket_url("s3", &config.bucket, config.key.as_ref());

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }

    pub(super) fn construct_gcs(config: GcsConfig) -> Result<Self, StorageError> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());

        // Inline JSON key, for environments without a key file.
        if let Ok(key) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            builder = builder.with_service_account_key(&key);
        }

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(GcsConfigSnafu)?);
        let canonical_url = bucket_url("gs", &config.bucket, config.key.as_ref());

        Ok(Self {
            config: BackendConfig::Gcs(config),
            object_store,
            canonical_url,
        })
    }
}
