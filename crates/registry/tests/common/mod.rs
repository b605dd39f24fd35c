//! Registry test utilities.

use hoard_core::{ContentHash, SourceType};
use hoard_registry::{NewArtifact, RegistryResult, SqliteRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A file-backed registry that cleans up on drop.
pub struct TestRegistry {
    pub store: Arc<SqliteRegistry>,
    pub temp_dir: TempDir,
}

impl TestRegistry {
    pub async fn new() -> RegistryResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = SqliteRegistry::new(temp_dir.path().join("registry.db")).await?;
        Ok(Self {
            store: Arc::new(store),
            temp_dir,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("registry.db")
    }
}

/// A plain downloaded artifact.
pub fn download(identifier: &str, size: u64) -> NewArtifact {
    NewArtifact {
        identifier: identifier.to_string(),
        canonical_path: PathBuf::from(format!("/cache/downloads/{}", identifier.replace([':', '/'], "_"))),
        size_bytes: size,
        content_hash: None,
        source_type: SourceType::Download,
        is_symlink: false,
        symlink_target: None,
    }
}

pub fn hash(seed: &str) -> ContentHash {
    ContentHash::compute(seed.as_bytes())
}
