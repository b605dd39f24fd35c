//! Source adapters for hoard.
//!
//! Each adapter translates one model store into the unified resolution
//! interface:
//! - `hf`: downloads from a model hub into the hoard cache
//! - `hub`: read-only scan of a content-addressable hub cache
//! - `ollama`: links into a foreign inference tool's blob store
//! - `local`: copies of user-supplied files and directories
//!
//! Writes into the cache always go through a staging path that is removed
//! unless committed.

pub mod adapters;
pub mod error;
pub mod payload;
pub mod staging;
pub mod traits;

pub use adapters::{DownloadAdapter, HubCacheAdapter, LocalImportAdapter, OllamaAdapter};
pub use error::{SourceError, SourceResult};
pub use traits::{AcquireContext, Progress, ProgressFn, ResolvedArtifact, SourceAdapter};

use hoard_core::{HoardConfig, SourceType};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The adapters available to a cache manager, at most one per source type.
#[derive(Clone)]
pub struct SourceSet {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    owned_dirs: Vec<(SourceType, PathBuf)>,
}

impl SourceSet {
    /// Build every adapter from configuration.
    pub fn from_config(config: &HoardConfig) -> SourceResult<Self> {
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(DownloadAdapter::new(config)?),
            Arc::new(HubCacheAdapter::new(config)),
            Arc::new(OllamaAdapter::new(config)),
            Arc::new(LocalImportAdapter::new(config)),
        ];
        Ok(Self::new(adapters, config))
    }

    /// Use an explicit adapter list; later entries replace earlier ones of the same type.
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, config: &HoardConfig) -> Self {
        let mut set: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            set.retain(|a| a.source_type() != adapter.source_type());
            set.push(adapter);
        }
        set.sort_by_key(|a| a.source_type());
        Self {
            adapters: set,
            owned_dirs: vec![
                (SourceType::Download, config.downloads_dir()),
                (SourceType::LocalImport, config.local_dir()),
                (SourceType::ForeignSymlink, config.foreign_dir()),
            ],
        }
    }

    pub fn get(&self, source: SourceType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.source_type() == source)
            .cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.iter()
    }

    /// Directories whose contents hoard writes and may replace.
    pub fn owned_dirs(&self) -> impl Iterator<Item = &Path> {
        self.owned_dirs.iter().map(|(_, dir)| dir.as_path())
    }

    /// The top-level cache entry hoard owns for a payload at `path`.
    ///
    /// `None` when the path is not inside the namespace hoard manages for
    /// `source`; such paths must never be deleted or replaced.
    pub fn owned_root(&self, source: SourceType, path: &Path) -> Option<PathBuf> {
        let (_, base) = self.owned_dirs.iter().find(|(s, _)| *s == source)?;
        let rel = path.strip_prefix(base).ok()?;
        let first = rel.components().next()?;
        match first {
            std::path::Component::Normal(name) => Some(base.join(name)),
            _ => None,
        }
    }
}
