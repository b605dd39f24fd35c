//! Source adapter trait definitions.

use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use hoard_core::{ContentHash, Identifier, SourceType};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress of one acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    /// File currently being transferred, relative to the artifact root.
    pub file: String,
    /// Bytes transferred so far across the whole artifact.
    pub bytes_done: u64,
    /// Expected total, when the source publishes it.
    pub bytes_total: Option<u64>,
}

pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Per-call context for `acquire`.
#[derive(Clone, Default)]
pub struct AcquireContext {
    pub cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl AcquireContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn report(&self, progress: &Progress) {
        if let Some(f) = &self.progress {
            f(progress);
        }
    }

    pub fn check_cancelled(&self) -> SourceResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Debug for AcquireContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// An artifact as one source sees it on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub identifier: Identifier,
    /// Where the payload (or the hoard-owned link to it) lives.
    pub canonical_path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: Option<ContentHash>,
    pub is_symlink: bool,
    pub symlink_target: Option<PathBuf>,
    pub file_count: usize,
    /// Set when this call wrote the payload (or link) into the cache.
    pub newly_written: bool,
}

impl ResolvedArtifact {
    pub fn source_type(&self) -> SourceType {
        self.identifier.source()
    }

    pub fn name(&self) -> &str {
        self.identifier.name()
    }
}

/// Translates one store into the unified resolution interface.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Read-only lookup of an artifact already present in the store.
    async fn resolve(&self, name: &str) -> SourceResult<ResolvedArtifact>;

    /// Names this store currently holds. Never mutates the store.
    async fn list_available(&self) -> SourceResult<Vec<String>>;

    /// Bring the artifact into the cache.
    async fn acquire(&self, name: &str, ctx: &AcquireContext) -> SourceResult<ResolvedArtifact> {
        ctx.check_cancelled()?;
        self.resolve(name).await
    }
}
