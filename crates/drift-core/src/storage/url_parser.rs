//! URL parsing for storage backends.
//!
//! Turns a temp location such as `gs://bucket/tmp` or `/var/drift` into a
//! backend configuration plus an optional key prefix inside that backend.

use object_store::path::Path;
use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{GcsConfig, LocalConfig, MemoryConfig, S3Config};

const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";
const FILE_URI: &str = r"^file://(?P<path>/.*)$";
const FILE_PATH: &str = r"^(?P<path>/.*)$";
const MEMORY_URL: &str = r"^memory://(?P<key>.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Local,
    Memory,
}

/// Ordered so the more specific S3 endpoint form wins over the plain one.
static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (Backend::S3, S3_ENDPOINT_URL),
        (Backend::S3, S3_URL),
        (Backend::Gcs, GCS_URL),
        (Backend::Memory, MEMORY_URL),
        (Backend::Local, FILE_URI),
        (Backend::Local, FILE_PATH),
    ]
    .into_iter()
    .map(|(backend, pattern)| (backend, Regex::new(pattern).expect("valid storage URL pattern")))
    .collect()
});

/// Backend configuration parsed from a storage URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Local(LocalConfig),
    Memory(MemoryConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use drift_core::storage::BackendConfig;
    ///
    /// let config = BackendConfig::parse_url("gs://bucket/tmp/drift").unwrap();
    /// assert_eq!(config.key().map(|k| k.to_string()), Some("tmp/drift".to_string()));
    ///
    /// assert!(BackendConfig::parse_url("ftp://host/dir").is_err());
    /// ```
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let Some((backend, caps)) = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(url).map(|caps| (*backend, caps)))
        else {
            return InvalidUrlSnafu {
                url: url.to_string(),
            }
            .fail();
        };

        let config = match backend {
            Backend::S3 => Self::parse_s3(&caps),
            Backend::Gcs => BackendConfig::Gcs(GcsConfig {
                bucket: caps["bucket"].to_string(),
                key: key_from(&caps),
            }),
            Backend::Local => BackendConfig::Local(LocalConfig {
                path: caps["path"].trim_end_matches('/').to_string(),
            }),
            Backend::Memory => BackendConfig::Memory(MemoryConfig {
                key: key_from(&caps),
            }),
        };
        Ok(config)
    }

    fn parse_s3(caps: &Captures) -> Self {
        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            caps.name("endpoint").map(|endpoint| {
                let protocol = caps.name("protocol").map_or("https", |p| p.as_str());
                let port = caps.name("port").map_or("443", |p| p.as_str());
                format!("{protocol}://{}:{port}", endpoint.as_str())
            })
        });

        BackendConfig::S3(S3Config {
            bucket: caps["bucket"].to_string(),
            region: std::env::var("AWS_DEFAULT_REGION").ok(),
            endpoint,
            key: key_from(caps),
        })
    }

    /// Key prefix inside the backend, if any.
    ///
    /// Local paths are rooted at the directory itself and never carry a key.
    pub fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(config) => config.key.as_ref(),
            BackendConfig::Gcs(config) => config.key.as_ref(),
            BackendConfig::Memory(config) => config.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

fn key_from(caps: &Captures) -> Option<Path> {
    caps.name("key")
        .map(|m| m.as_str().trim_matches('/'))
        .filter(|key| !key.is_empty())
        .map(Path::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3() {
        let config = BackendConfig::parse_url("s3://my-bucket/staging/tmp").unwrap();
        let BackendConfig::S3(s3) = config else {
            panic!("expected S3 config");
        };
        assert_eq!(s3.bucket, "my-bucket");
        assert_eq!(s3.key, Some(Path::from("staging/tmp")));
    }

    #[test]
    fn test_parse_s3_with_endpoint() {
        let config = BackendConfig::parse_url("s3::http://localhost:9000/bucket/key").unwrap();
        let BackendConfig::S3(s3) = config else {
            panic!("expected S3 config");
        };
        assert_eq!(s3.bucket, "bucket");
        if std::env::var("AWS_ENDPOINT").is_err() {
            assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
        }
    }

    #[test]
    fn test_parse_gcs_without_key() {
        let config = BackendConfig::parse_url("gs://bucket").unwrap();
        assert_eq!(
            config,
            BackendConfig::Gcs(GcsConfig {
                bucket: "bucket".to_string(),
                key: None,
            })
        );
    }

    #[test]
    fn test_parse_local_forms() {
        let expected = BackendConfig::Local(LocalConfig {
            path: "/tmp/drift".to_string(),
        });
        assert_eq!(BackendConfig::parse_url("/tmp/drift/").unwrap(), expected);
        assert_eq!(BackendConfig::parse_url("file:///tmp/drift").unwrap(), expected);
    }

    #[test]
    fn test_parse_memory() {
        let config = BackendConfig::parse_url("memory://scratch").unwrap();
        assert_eq!(config.key(), Some(&Path::from("scratch")));

        let config = BackendConfig::parse_url("memory://").unwrap();
        assert_eq!(config.key(), None);
    }

    #[test]
    fn test_parse_invalid() {
        for url in ["", "relative/path", "ftp://host/x", "https://example.com/x"] {
            assert!(
                matches!(
                    BackendConfig::parse_url(url),
                    Err(StorageError::InvalidUrl { .. })
                ),
                "expected {url:?} to be rejected"
            );
        }
    }
}
