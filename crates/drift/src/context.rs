//! Values computed once per run and shared read-only by every stage.

use object_store::path::Path;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use drift_core::StorageProviderRef;

/// Directory under the temp location that holds staged files.
pub const TEMP_DIR: &str = "DriftWriteTemp";

/// Random token identifying one run. Every job id derives from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobIdToken(String);

impl JobIdToken {
    /// Generate a fresh token.
    pub fn generate() -> Self {
        Self(format!("drift_load_{}", Uuid::new_v4().simple()))
    }

    /// Use a known token, e.g. to resume a run under the same job ids.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobIdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broadcast context of a load run.
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub token: JobIdToken,
    /// Prefix, relative to the temp storage root, of every staged file.
    pub temp_prefix: Path,
    pub storage: StorageProviderRef,
}

/// Shared handle to the run context.
pub type LoadContextRef = Arc<LoadContext>;

impl LoadContext {
    pub fn new(token: JobIdToken, storage: StorageProviderRef) -> Self {
        let temp_prefix = Path::from_iter([TEMP_DIR, token.as_str()]);
        Self {
            token,
            temp_prefix,
            storage,
        }
    }

    /// Path for a new staged file.
    pub fn new_file_path(&self) -> Path {
        self.temp_prefix.child(Uuid::new_v4().simple().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::StorageProvider;

    #[tokio::test]
    async fn test_temp_prefix() {
        let storage = Arc::new(StorageProvider::for_url("memory://").await.unwrap());
        let ctx = LoadContext::new(JobIdToken::new("tok"), storage);

        assert_eq!(ctx.temp_prefix.as_ref(), "DriftWriteTemp/tok");
        let a = ctx.new_file_path();
        let b = ctx.new_file_path();
        assert_ne!(a, b);
        assert!(a.prefix_matches(&ctx.temp_prefix));
    }

    #[test]
    fn test_generated_tokens_differ() {
        let a = JobIdToken::generate();
        let b = JobIdToken::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("drift_load_"));
    }
}
