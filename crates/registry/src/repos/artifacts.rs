//! Artifact repository.

use crate::error::RegistryResult;
use crate::models::{ArtifactRow, NewArtifact, UpsertOutcome};
use async_trait::async_trait;
use hoard_core::{ContentHash, SourceType};
use std::path::Path;

/// Repository for tracked artifacts.
#[async_trait]
pub trait ArtifactRepo: Send + Sync {
    /// Insert or update an artifact keyed by identifier.
    ///
    /// Performs no write when every tracked attribute already matches. A size
    /// change clears a previously recorded content hash unless a new one is given.
    async fn upsert_artifact(&self, artifact: &NewArtifact) -> RegistryResult<UpsertOutcome>;

    /// Get an artifact by identifier.
    async fn get_artifact(&self, identifier: &str) -> RegistryResult<Option<ArtifactRow>>;

    /// List artifacts, optionally restricted to one source.
    async fn list_artifacts(&self, source: Option<SourceType>) -> RegistryResult<Vec<ArtifactRow>>;

    /// Delete an artifact and its usage rows.
    ///
    /// Fails with `InUse` and writes nothing when applications still use the
    /// artifact, unless `force` is set.
    async fn remove_artifact(&self, identifier: &str, force: bool) -> RegistryResult<ArtifactRow>;

    /// Artifacts with zero usage rows.
    async fn find_orphaned(&self) -> RegistryResult<Vec<ArtifactRow>>;

    /// Record a verified content hash.
    async fn set_content_hash(&self, identifier: &str, hash: ContentHash) -> RegistryResult<()>;

    /// Flip an artifact to a symlink pointing at `target`.
    async fn mark_symlink(&self, identifier: &str, target: &Path) -> RegistryResult<()>;

    /// Make `canonical` the physical holder at `canonical_path` and point every
    /// artifact in `dependents` at it, atomically.
    async fn relink_group(
        &self,
        canonical: &str,
        canonical_path: &Path,
        dependents: &[String],
    ) -> RegistryResult<()>;

    /// Delete `removed` and hand its payload role to `heir` at `heir_path`,
    /// pointing `others` at the heir, in one transaction.
    ///
    /// Fails with `InUse` and writes nothing under the same rule as
    /// [`ArtifactRepo::remove_artifact`].
    async fn promote_artifact(
        &self,
        removed: &str,
        force: bool,
        heir: &str,
        heir_path: &Path,
        others: &[String],
    ) -> RegistryResult<ArtifactRow>;

    /// Symlinked artifacts whose target is `path`, oldest first.
    async fn symlinks_targeting(&self, path: &Path) -> RegistryResult<Vec<ArtifactRow>>;
}
