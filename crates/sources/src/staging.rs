//! Staging paths for atomic writes into the cache.
//!
//! Content is written to a sibling `.partial-<uuid>` path and renamed into
//! place on commit. An uncommitted guard removes its path when dropped, so a
//! failed, cancelled, or dropped acquisition leaves nothing behind.

use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const STAGING_PREFIX: &str = ".partial-";

pub struct StagingGuard {
    path: PathBuf,
    committed: bool,
}

impl StagingGuard {
    /// Reserve a staging path next to `final_path`.
    pub fn beside(final_path: &Path) -> Self {
        let parent = final_path.parent().unwrap_or_else(|| Path::new("."));
        Self {
            path: parent.join(format!("{STAGING_PREFIX}{}", Uuid::new_v4())),
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically move the staged content to `final_path`.
    pub async fn commit(mut self, final_path: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, final_path).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let result = match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&self.path),
            Ok(_) => std::fs::remove_file(&self.path),
            Err(_) => return,
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staging path");
        }
    }
}

/// Whether a directory entry is an in-flight staging path.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}
