//! Serializable results of cache operations.

use crate::dedup::LinkAction;
use hoard_core::{ContentHash, SourceType};
use hoard_registry::{ApplicationRow, ArtifactRow, RegistryResult};
use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;

/// An artifact record for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactView {
    pub identifier: String,
    pub source: SourceType,
    pub canonical_path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: Option<ContentHash>,
    pub is_symlink: bool,
    pub symlink_target: Option<PathBuf>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TryFrom<&ArtifactRow> for ArtifactView {
    type Error = hoard_registry::RegistryError;

    fn try_from(row: &ArtifactRow) -> RegistryResult<Self> {
        Ok(Self {
            identifier: row.identifier.clone(),
            source: row.source()?,
            canonical_path: row.path(),
            size_bytes: row.size(),
            content_hash: row.hash(),
            is_symlink: row.is_symlink,
            symlink_target: row.target(),
            created_at: row.created_at,
        })
    }
}

/// One line of `status`. The JSON shape is a stable interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub identifier: String,
    pub size_bytes: u64,
    pub source: String,
    pub used_by: Vec<String>,
    pub is_symlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub identifier: String,
    pub size_bytes: u64,
    /// The payload bytes were deleted from disk.
    pub payload_deleted: bool,
    /// A dependent that took over the payload instead of it being deleted.
    pub promoted: Option<String>,
    /// Applications whose usage was dropped by a forced removal.
    pub released_apps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source: SourceType,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failures: Vec<SyncFailure>,
    /// Registered artifacts the source no longer lists. Not deleted.
    pub missing: Vec<String>,
}

impl SyncReport {
    pub fn new(source: SourceType) -> Self {
        Self {
            source,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            failures: Vec::new(),
            missing: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanEntry {
    pub identifier: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub dry_run: bool,
    /// Removed orphans, or the ones that would be removed on a dry run.
    pub removed: Vec<CleanEntry>,
    /// Orphans whose payload belongs to another tool.
    pub skipped_protected: Vec<String>,
    pub failures: Vec<SyncFailure>,
    pub reclaimed_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub linked: Vec<LinkAction>,
    pub failures: Vec<SyncFailure>,
    pub reclaimed_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source: SourceType,
    pub count: usize,
    /// Bytes physically held by this source's artifacts.
    pub total_size: u64,
    /// Bytes as seen by consumers, links included.
    pub logical_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LargestEntry {
    pub identifier: String,
    pub size_bytes: u64,
    pub source: SourceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub artifact_count: usize,
    pub application_count: usize,
    pub total_size: u64,
    pub logical_size: u64,
    pub savings: u64,
    pub by_source: Vec<SourceStats>,
    pub largest: Vec<LargestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    pub name: String,
    pub root_path: PathBuf,
    pub uses: Vec<String>,
}

impl LinkReport {
    pub(crate) fn new(app: &ApplicationRow, uses: Vec<String>) -> Self {
        Self {
            name: app.name.clone(),
            root_path: PathBuf::from(&app.root_path),
            uses,
        }
    }
}
