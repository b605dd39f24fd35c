//! Database models mapping to the registry schema.

use crate::error::{RegistryError, RegistryResult};
use hoard_core::{ContentHash, SourceType};
use sqlx::FromRow;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Artifacts
// =============================================================================

/// Artifact record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ArtifactRow {
    pub artifact_id: Uuid,
    pub identifier: String,
    pub canonical_path: String,
    pub size_bytes: i64,
    pub content_hash: Option<String>,
    pub source_type: String,
    pub is_symlink: bool,
    /// Set iff `is_symlink`.
    pub symlink_target: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_verified_at: OffsetDateTime,
}

impl ArtifactRow {
    pub fn source(&self) -> RegistryResult<SourceType> {
        self.source_type.parse().map_err(|_| {
            RegistryError::Corruption(format!(
                "artifact {} has unknown source type '{}'",
                self.identifier, self.source_type
            ))
        })
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.canonical_path)
    }

    pub fn target(&self) -> Option<PathBuf> {
        self.symlink_target.as_ref().map(PathBuf::from)
    }

    pub fn size(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or(0)
    }

    pub fn hash(&self) -> Option<ContentHash> {
        self.content_hash
            .as_deref()
            .and_then(|h| ContentHash::from_hex(h).ok())
    }
}

/// Attributes written by an upsert. Identity and timestamps are managed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub identifier: String,
    pub canonical_path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: Option<ContentHash>,
    pub source_type: SourceType,
    pub is_symlink: bool,
    pub symlink_target: Option<PathBuf>,
}

impl NewArtifact {
    pub(crate) fn size_i64(&self) -> RegistryResult<i64> {
        i64::try_from(self.size_bytes).map_err(|_| {
            RegistryError::Internal(format!("size {} out of range", self.size_bytes))
        })
    }

    /// True when writing `self` over `row` would change nothing.
    pub(crate) fn matches(&self, row: &ArtifactRow) -> bool {
        let hash_unchanged = match &self.content_hash {
            None => true,
            Some(hash) => row.content_hash.as_deref() == Some(hash.to_hex().as_str()),
        };
        row.canonical_path == path_str(&self.canonical_path)
            && row.size() == self.size_bytes
            && row.source_type == self.source_type.as_str()
            && row.is_symlink == self.is_symlink
            && row.symlink_target.as_deref() == self.symlink_target.as_deref().map(path_str).as_deref()
            && hash_unchanged
    }
}

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

// =============================================================================
// Applications and usage
// =============================================================================

/// Application registered against the cache.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ApplicationRow {
    pub app_id: Uuid,
    pub name: String,
    pub root_path: String,
    pub registered_at: OffsetDateTime,
}

/// Usage link between an artifact and an application.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UsageRow {
    pub artifact_id: Uuid,
    pub app_id: Uuid,
    pub last_used_at: OffsetDateTime,
}

pub(crate) fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
