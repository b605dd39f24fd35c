//! Read-only scanner over a content-addressable hub cache (`hub:org/name`).
//!
//! Layout: `models--{org}--{name}/{blobs,refs/main,snapshots/<rev>}`, where
//! snapshot entries link into `blobs/`. Nothing under the scanned tree is
//! ever created, moved, or deleted.

use super::parse_repo_id;
use crate::error::{SourceError, SourceResult};
use crate::payload::{inspect_async, list_entries};
use crate::traits::{ResolvedArtifact, SourceAdapter};
use async_trait::async_trait;
use hoard_core::{HoardConfig, Identifier, SourceType};
use std::path::{Path, PathBuf};
use tracing::instrument;

const REPO_PREFIX: &str = "models--";

pub struct HubCacheAdapter {
    root: PathBuf,
}

impl HubCacheAdapter {
    pub fn new(config: &HoardConfig) -> Self {
        Self {
            root: config.hub_cache_dir.clone(),
        }
    }

    /// The snapshot directory `refs/main` points at.
    ///
    /// Without a ref, a repository holding exactly one snapshot uses it.
    async fn current_snapshot(&self, repo_dir: &Path) -> SourceResult<Option<PathBuf>> {
        let snapshots = repo_dir.join("snapshots");
        match tokio::fs::read_to_string(repo_dir.join("refs").join("main")).await {
            Ok(rev) => {
                let rev = rev.trim();
                if rev.is_empty() || rev.contains(['/', '\\']) || rev == "." || rev == ".." {
                    return Err(SourceError::Manifest {
                        path: repo_dir.join("refs/main").display().to_string(),
                        reason: format!("invalid revision '{rev}'"),
                    });
                }
                let snapshot = snapshots.join(rev);
                Ok(tokio::fs::try_exists(&snapshot).await?.then_some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match list_entries(&snapshots).await?.as_slice() {
                    [only] => Ok(Some(snapshots.join(only))),
                    _ => Ok(None),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SourceAdapter for HubCacheAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::NativeCacheScan
    }

    #[instrument(skip(self), fields(source = "hub"))]
    async fn resolve(&self, name: &str) -> SourceResult<ResolvedArtifact> {
        let repo = parse_repo_id(name)?;
        let repo_dir = self.root.join(format!("{REPO_PREFIX}{}", repo.dir_name()));
        let snapshot = self
            .current_snapshot(&repo_dir)
            .await?
            .ok_or_else(|| SourceError::NotFound(format!("hub:{name}")))?;

        let info = inspect_async(snapshot).await?;
        if info.file_count == 0 {
            return Err(SourceError::NotFound(format!("hub:{name} has an empty snapshot")));
        }

        // Snapshot entries are links into blobs/; the payload is the snapshot
        // view, which the tool owns.
        Ok(ResolvedArtifact {
            identifier: Identifier::new(SourceType::NativeCacheScan, name)?,
            canonical_path: info.path,
            size_bytes: info.size_bytes,
            content_hash: None,
            is_symlink: false,
            symlink_target: None,
            file_count: info.file_count,
            newly_written: false,
        })
    }

    async fn list_available(&self) -> SourceResult<Vec<String>> {
        Ok(list_entries(&self.root)
            .await?
            .into_iter()
            .filter_map(|dir| {
                let (org, name) = dir.strip_prefix(REPO_PREFIX)?.split_once("--")?;
                let id = format!("{org}/{name}");
                parse_repo_id(&id).is_ok().then_some(id)
            })
            .collect())
    }
}
