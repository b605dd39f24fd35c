//! The cache manager: the operations behind every command.

use crate::dedup::{self, DedupMember, DedupPlan, LinkAction, hash_in_background};
use crate::error::{CacheError, CacheResult};
use crate::files::{
    backup_path, find_backups, hard_link_tree, is_link_or_missing, remove_path, replace_with_link,
    restore_backup, symlink,
};
use crate::report::{
    ApplyReport, ArtifactView, CacheStats, CleanEntry, CleanReport, LargestEntry, LinkReport,
    RemoveReport, SourceStats, StatusEntry, SyncFailure, SyncReport,
};
use hoard_core::{HoardConfig, Identifier, SourceType};
use hoard_registry::{ArtifactRow, NewArtifact, Registry, UpsertOutcome};
use hoard_sources::staging::StagingGuard;
use hoard_sources::{AcquireContext, ResolvedArtifact, SourceSet};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LARGEST_LIMIT: usize = 10;

/// Coordinates sources, the registry, and the cache tree.
pub struct CacheManager {
    config: HoardConfig,
    registry: Arc<dyn Registry>,
    sources: SourceSet,
}

impl CacheManager {
    pub fn new(config: HoardConfig, registry: Arc<dyn Registry>, sources: SourceSet) -> Self {
        Self {
            config,
            registry,
            sources,
        }
    }

    /// Open the configured registry and build every adapter.
    pub async fn open(config: HoardConfig) -> CacheResult<Self> {
        let registry = hoard_registry::open(&config).await?;
        let sources = SourceSet::from_config(&config)?;
        Ok(Self::new(config, registry, sources))
    }

    pub fn config(&self) -> &HoardConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Resolve `input` to the stored identifier form, keeping unparseable input as-is.
    fn stored_identifier(input: &str) -> String {
        Identifier::parse(input)
            .map(|id| id.to_string())
            .unwrap_or_else(|_| input.to_string())
    }

    async fn require_artifact(&self, identifier: &str) -> CacheResult<ArtifactRow> {
        self.registry
            .get_artifact(identifier)
            .await?
            .ok_or_else(|| CacheError::NotFound(identifier.to_string()))
    }

    // =========================================================================
    // add / remove
    // =========================================================================

    /// Acquire an artifact through its source and record it. Idempotent.
    pub async fn add(&self, identifier: &str, ctx: &AcquireContext) -> CacheResult<ArtifactView> {
        let id = Identifier::parse(identifier)?;
        let adapter = self
            .sources
            .get(id.source())
            .ok_or_else(|| CacheError::InvalidIdentifier(format!("no adapter for {id}")))?;

        let resolved = adapter.acquire(id.name(), ctx).await?;
        let stored = resolved.identifier.to_string();
        let outcome = match self.registry.upsert_artifact(&new_artifact(&resolved)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_unrecorded(&resolved).await;
                return Err(e.into());
            }
        };
        tracing::info!(identifier = %stored, ?outcome, size_bytes = resolved.size_bytes, "Added artifact");

        let row = self.require_artifact(&stored).await?;
        Ok(ArtifactView::try_from(&row)?)
    }

    /// Delete a payload this call wrote but the registry never recorded.
    async fn discard_unrecorded(&self, resolved: &ResolvedArtifact) {
        if !resolved.newly_written {
            return;
        }
        let Some(root) = self
            .sources
            .owned_root(resolved.source_type(), &resolved.canonical_path)
        else {
            return;
        };
        match remove_path(&root).await {
            Ok(()) => tracing::info!(path = %root.display(), "Discarded unrecorded payload"),
            Err(e) => tracing::warn!(path = %root.display(), error = %e, "Failed to discard unrecorded payload"),
        }
    }

    /// Remove an artifact record and whatever payload only it owned.
    pub async fn remove(&self, identifier: &str, force: bool) -> CacheResult<RemoveReport> {
        let identifier = Self::stored_identifier(identifier);
        let row = self.require_artifact(&identifier).await?;
        let source = row.source()?;
        let apps = self.registry.apps_using(&identifier).await?;
        if !apps.is_empty() && !force {
            return Err(CacheError::InUse { identifier, apps });
        }
        let dependents = if row.is_symlink {
            Vec::new()
        } else {
            self.registry.symlinks_targeting(&row.path()).await?
        };

        let mut report = RemoveReport {
            identifier: identifier.clone(),
            size_bytes: row.size(),
            payload_deleted: false,
            promoted: None,
            released_apps: if force { apps } else { Vec::new() },
        };
        let owned = self.sources.owned_root(source, &row.path());

        if let (Some(owned), Some((heir, rest))) = (&owned, dependents.split_first()) {
            self.promote(&row, force, heir, rest).await?;
            report.promoted = Some(heir.identifier.clone());
            if let Err(e) = remove_path(owned).await {
                tracing::warn!(path = %owned.display(), error = %e, "Failed to delete promoted-away payload");
            }
            return Ok(report);
        }

        self.registry.remove_artifact(&identifier, force).await?;
        tracing::info!(identifier = %identifier, force, "Removed artifact record");

        let Some(owned) = owned else {
            tracing::debug!(identifier = %identifier, "Payload belongs to another tool; left in place");
            return Ok(report);
        };
        // A link row only takes its hoard-owned link; the target is untouched.
        remove_path(&owned).await?;
        if !row.is_symlink {
            report.payload_deleted = true;
            tracing::info!(identifier = %identifier, path = %owned.display(), "Deleted payload");
        }
        Ok(report)
    }

    /// Hand a departing canonical payload to its oldest dependent.
    ///
    /// The heir's copy is built from hard links and every link is re-pointed
    /// before the registry changes; if the registry refuses, the old links
    /// are put back and the departing payload is untouched.
    async fn promote(
        &self,
        removed: &ArtifactRow,
        force: bool,
        heir: &ArtifactRow,
        rest: &[ArtifactRow],
    ) -> CacheResult<()> {
        let payload = removed.path();
        let heir_path = heir.path();

        for dependent in std::iter::once(heir).chain(rest) {
            let path = dependent.path();
            if !is_link_or_missing(&path).await? {
                return Err(CacheError::NotAllowed(format!(
                    "{} is no longer a link; refusing to overwrite it",
                    path.display()
                )));
            }
        }

        if let Some(parent) = heir_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = StagingGuard::beside(&heir_path);
        hard_link_tree(&payload, staging.path()).await?;

        // A directory cannot be renamed over a link.
        let payload_is_dir = tokio::fs::symlink_metadata(&payload).await?.is_dir();
        if payload_is_dir {
            remove_path(&heir_path).await?;
        }
        if let Err(e) = staging.commit(&heir_path).await {
            if payload_is_dir {
                replace_with_link(&heir_path, &payload).await?;
            }
            return Err(e.into());
        }

        let others: Vec<String> = rest.iter().map(|d| d.identifier.clone()).collect();
        let mut relinked = Vec::with_capacity(rest.len());
        for dependent in rest {
            if let Err(e) = replace_with_link(&dependent.path(), &heir_path).await {
                restore_links(&payload, heir, &relinked).await;
                return Err(e);
            }
            relinked.push(dependent);
        }

        if let Err(e) = self
            .registry
            .promote_artifact(&removed.identifier, force, &heir.identifier, &heir_path, &others)
            .await
        {
            restore_links(&payload, heir, &relinked).await;
            return Err(e.into());
        }

        tracing::info!(
            from = %removed.identifier,
            to = %heir.identifier,
            relinked = others.len(),
            "Promoted dependent to canonical"
        );
        Ok(())
    }

    // =========================================================================
    // sync / clean
    // =========================================================================

    /// Re-enumerate one source and bring the registry in line with it.
    pub async fn sync(&self, source: SourceType, cancel: &CancellationToken) -> CacheResult<SyncReport> {
        let adapter = self
            .sources
            .get(source)
            .ok_or_else(|| CacheError::InvalidIdentifier(format!("no adapter for {source}")))?;
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        self.recover_interrupted().await?;
        let ctx = AcquireContext::new(cancel.clone());
        let mut report = SyncReport::new(source);
        let mut seen = HashSet::new();

        for name in adapter.list_available().await? {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            // For every source this only resolves what is already present,
            // except foreign models, whose hoard-owned link is (re)created.
            let resolved = match adapter.acquire(&name, &ctx).await {
                Ok(resolved) => resolved,
                Err(hoard_sources::SourceError::Cancelled) => return Err(CacheError::Cancelled),
                Err(e) => {
                    tracing::warn!(source = %source, name = %name, error = %e, "Failed to resolve during sync");
                    report.failures.push(SyncFailure {
                        name,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            seen.insert(resolved.identifier.to_string());

            match self.registry.upsert_artifact(&new_artifact(&resolved)).await {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
                Err(e) if e.is_corruption() => return Err(e.into()),
                Err(e) => report.failures.push(SyncFailure {
                    name,
                    message: e.to_string(),
                }),
            }
        }

        report.missing = self
            .registry
            .list_artifacts(Some(source))
            .await?
            .into_iter()
            .map(|row| row.identifier)
            .filter(|id| !seen.contains(id))
            .collect();

        tracing::info!(
            source = %source,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            failures = report.failures.len(),
            missing = report.missing.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Sync every source in turn.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> CacheResult<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for source in SourceType::ALL {
            if self.sources.get(source).is_some() {
                reports.push(self.sync(source, cancel).await?);
            }
        }
        Ok(reports)
    }

    /// Remove orphaned artifacts whose payload hoard owns.
    pub async fn clean(&self, dry_run: bool, cancel: &CancellationToken) -> CacheResult<CleanReport> {
        let mut report = CleanReport {
            dry_run,
            ..CleanReport::default()
        };

        for orphan in self.registry.find_orphaned().await? {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            if orphan.source()?.is_protected() {
                report.skipped_protected.push(orphan.identifier);
                continue;
            }

            if dry_run {
                let sole_holder = !orphan.is_symlink
                    && self.registry.symlinks_targeting(&orphan.path()).await?.is_empty();
                if sole_holder {
                    report.reclaimed_bytes += orphan.size();
                }
                report.removed.push(CleanEntry {
                    size_bytes: orphan.size(),
                    identifier: orphan.identifier,
                });
                continue;
            }

            match self.remove(&orphan.identifier, false).await {
                Ok(removed) => {
                    if removed.payload_deleted {
                        report.reclaimed_bytes += removed.size_bytes;
                    }
                    report.removed.push(CleanEntry {
                        identifier: removed.identifier,
                        size_bytes: removed.size_bytes,
                    });
                }
                Err(e) if e.is_corruption() => return Err(e),
                Err(e) => {
                    tracing::warn!(identifier = %orphan.identifier, error = %e, "Failed to clean orphan");
                    report.failures.push(SyncFailure {
                        name: orphan.identifier,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    // =========================================================================
    // deduplication
    // =========================================================================

    /// Find confirmed duplicates across the registry and every source.
    ///
    /// Hashes computed for registered artifacts are persisted; nothing else
    /// is written.
    pub async fn dedup_plan(&self, cancel: &CancellationToken) -> CacheResult<DedupPlan> {
        self.build_plan(cancel, true).await
    }

    /// Like [`Self::dedup_plan`], but writes nothing at all.
    pub async fn dedup_preview(&self, cancel: &CancellationToken) -> CacheResult<DedupPlan> {
        self.build_plan(cancel, false).await
    }

    async fn build_plan(&self, cancel: &CancellationToken, persist: bool) -> CacheResult<DedupPlan> {
        let rows = self.registry.list_artifacts(None).await?;
        let known: HashSet<String> = rows.iter().map(|r| r.identifier.clone()).collect();

        let mut members = Vec::with_capacity(rows.len());
        let mut linked_targets = HashSet::new();
        for row in &rows {
            let member = member_from_row(row)?;
            if member.is_symlink
                && !member.source_type.is_protected()
                && let Some(target) = &member.symlink_target
            {
                linked_targets.insert(target.clone());
            }
            members.push(member);
        }

        for adapter in self.sources.iter() {
            let names = match adapter.list_available().await {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(source = %adapter.source_type(), error = %e, "Failed to list source");
                    continue;
                }
            };
            for name in names {
                if cancel.is_cancelled() {
                    return Err(CacheError::Cancelled);
                }
                match adapter.resolve(&name).await {
                    Ok(resolved) if !known.contains(&resolved.identifier.to_string()) => {
                        members.push(member_from_resolved(&resolved));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(name = %name, error = %e, "Skipping unresolvable artifact"),
                }
            }
        }

        let plan = dedup::plan(members, &linked_targets, cancel).await?;
        for (identifier, hash) in &plan.computed_hashes {
            if persist && known.contains(identifier) {
                self.registry.set_content_hash(identifier, *hash).await?;
            }
        }

        tracing::info!(
            groups = plan.groups.len(),
            actions = plan.actions.len(),
            rejected = plan.rejected.len(),
            savings_bytes = plan.savings_bytes,
            "Deduplication plan ready"
        );
        Ok(plan)
    }

    /// Materialize a plan's link actions.
    ///
    /// Per action: both payloads are re-verified, the duplicate is kept
    /// under a backup name, the link is swapped in, and only then is the
    /// registry updated. Any failure restores the original payload.
    pub async fn apply_dedup(&self, plan: &DedupPlan, cancel: &CancellationToken) -> CacheResult<ApplyReport> {
        self.recover_interrupted().await?;
        let mut report = ApplyReport::default();
        for action in &plan.actions {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }
            match self.apply_action(action, cancel).await {
                Ok(()) => {
                    report.reclaimed_bytes += action.size_bytes;
                    report.linked.push(action.clone());
                }
                Err(e @ (CacheError::Cancelled | CacheError::RegistryCorruption(_))) => return Err(e),
                Err(e) => {
                    tracing::warn!(identifier = %action.identifier, error = %e, "Failed to apply link");
                    report.failures.push(SyncFailure {
                        name: action.identifier.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn apply_action(&self, action: &LinkAction, cancel: &CancellationToken) -> CacheResult<()> {
        self.ensure_registered(&action.target_identifier).await?;
        let row = self.ensure_registered(&action.identifier).await?;
        if row.is_symlink {
            tracing::debug!(identifier = %action.identifier, "Already linked");
            return Ok(());
        }
        let source = row.source()?;
        if source.is_protected() || self.sources.owned_root(source, &action.path).is_none() {
            return Err(CacheError::NotAllowed(format!(
                "{} is not owned by hoard and cannot be replaced",
                action.path.display()
            )));
        }

        for path in [&action.path, &action.target] {
            let actual = hash_in_background(path, cancel).await?;
            if actual != action.content_hash {
                return Err(CacheError::ChecksumMismatch(format!(
                    "{} changed since the plan was made (expected {}, found {actual})",
                    path.display(),
                    action.content_hash
                )));
            }
        }

        let backup = backup_path(&action.path);
        if tokio::fs::symlink_metadata(&action.path).await?.is_dir() {
            tokio::fs::rename(&action.path, &backup).await?;
            if let Err(e) = symlink(&action.target, &action.path).await {
                tokio::fs::rename(&backup, &action.path).await?;
                return Err(e.into());
            }
        } else {
            // The file never leaves its path: the link replaces it in one rename.
            tokio::fs::hard_link(&action.path, &backup).await?;
            if let Err(e) = replace_with_link(&action.path, &action.target).await {
                remove_path(&backup).await?;
                return Err(e);
            }
        }

        if let Err(e) = self
            .registry
            .mark_symlink(&action.identifier, &action.target)
            .await
        {
            restore_backup(&backup, &action.path).await?;
            return Err(e.into());
        }

        remove_path(&backup).await?;
        tracing::info!(
            identifier = %action.identifier,
            target = %action.target_identifier,
            size_bytes = action.size_bytes,
            "Replaced duplicate with link"
        );
        Ok(())
    }

    /// Repair backups left by a link swap that did not finish.
    ///
    /// A backup comes back when its original path is gone, or when a link
    /// sits there that the registry never recorded. Otherwise the swap
    /// completed and the backup is deleted. Returns how many were handled.
    pub async fn recover_interrupted(&self) -> CacheResult<usize> {
        let dirs = self.sources.owned_dirs().map(Path::to_path_buf).collect();
        let backups = find_backups(dirs).await?;
        if backups.is_empty() {
            return Ok(0);
        }

        let recorded: HashMap<PathBuf, bool> = self
            .registry
            .list_artifacts(None)
            .await?
            .into_iter()
            .map(|row| (row.path(), row.is_symlink))
            .collect();

        for (backup, origin) in &backups {
            let current = match tokio::fs::symlink_metadata(origin).await {
                Ok(meta) => Some(meta),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            let unrecorded_link = current.as_ref().is_some_and(|m| m.file_type().is_symlink())
                && recorded.get(origin) == Some(&false);
            if current.is_none() || unrecorded_link {
                restore_backup(backup, origin).await?;
                tracing::warn!(path = %origin.display(), "Restored payload from interrupted link swap");
            } else {
                remove_path(backup).await?;
                tracing::info!(path = %backup.display(), "Removed leftover backup");
            }
        }
        Ok(backups.len())
    }

    /// Registry row for `identifier`, registering it from its source if absent.
    async fn ensure_registered(&self, identifier: &str) -> CacheResult<ArtifactRow> {
        if let Some(row) = self.registry.get_artifact(identifier).await? {
            return Ok(row);
        }
        let id = Identifier::parse(identifier)?;
        let adapter = self
            .sources
            .get(id.source())
            .ok_or_else(|| CacheError::NotFound(identifier.to_string()))?;
        let resolved = adapter.resolve(id.name()).await?;
        self.registry.upsert_artifact(&new_artifact(&resolved)).await?;
        self.require_artifact(identifier).await
    }

    // =========================================================================
    // reporting
    // =========================================================================

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let rows = self.registry.list_artifacts(None).await?;
        let apps = self.registry.list_apps().await?;

        // A link saves space only when it stands in for a tracked copy.
        let held: Vec<&ArtifactRow> = rows.iter().filter(|r| !r.is_symlink).collect();
        let held_paths: HashSet<&str> = held.iter().map(|r| r.canonical_path.as_str()).collect();
        let held_hashes: HashSet<&str> = held
            .iter()
            .filter_map(|r| r.content_hash.as_deref())
            .collect();

        let mut by_source: BTreeMap<SourceType, SourceStats> = BTreeMap::new();
        let mut total_size = 0;
        let mut logical_size = 0;
        let mut savings = 0;
        let mut largest = Vec::with_capacity(rows.len());

        for row in &rows {
            let source = row.source()?;
            let size = row.size();
            let entry = by_source.entry(source).or_insert(SourceStats {
                source,
                count: 0,
                total_size: 0,
                logical_size: 0,
            });
            entry.count += 1;
            entry.logical_size += size;
            logical_size += size;
            if row.is_symlink {
                let duplicates_held = row
                    .symlink_target
                    .as_deref()
                    .is_some_and(|t| held_paths.contains(t))
                    || row
                        .content_hash
                        .as_deref()
                        .is_some_and(|h| held_hashes.contains(h));
                if duplicates_held {
                    savings += size;
                }
            } else {
                entry.total_size += size;
                total_size += size;
            }
            largest.push(LargestEntry {
                identifier: row.identifier.clone(),
                size_bytes: size,
                source,
            });
        }

        largest.sort_by(|a, b| {
            b.size_bytes
                .cmp(&a.size_bytes)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        largest.truncate(LARGEST_LIMIT);

        Ok(CacheStats {
            artifact_count: rows.len(),
            application_count: apps.len(),
            total_size,
            logical_size,
            savings,
            by_source: by_source.into_values().collect(),
            largest,
        })
    }

    pub async fn status(&self, source: Option<SourceType>) -> CacheResult<Vec<StatusEntry>> {
        let rows = self.registry.list_artifacts(source).await?;
        let mut usage = self.registry.usage_map().await?;
        Ok(rows
            .into_iter()
            .map(|row| StatusEntry {
                used_by: usage.remove(&row.identifier).unwrap_or_default(),
                size_bytes: row.size(),
                identifier: row.identifier,
                source: row.source_type,
                is_symlink: row.is_symlink,
            })
            .collect())
    }

    // =========================================================================
    // applications
    // =========================================================================

    /// Register an application rooted at `app_path` and record what it uses.
    pub async fn link(
        &self,
        app_path: &Path,
        name: Option<&str>,
        uses: &[String],
    ) -> CacheResult<LinkReport> {
        let root = tokio::fs::canonicalize(app_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CacheError::NotFound(format!("application path {}", app_path.display()))
            }
            _ => CacheError::Io(e),
        })?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(CacheError::InvalidIdentifier(format!(
                "{} is not a directory",
                app_path.display()
            )));
        }
        let name = match name {
            Some(name) => name.to_string(),
            None => root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    CacheError::InvalidIdentifier(format!(
                        "cannot derive an application name from {}",
                        root.display()
                    ))
                })?,
        };
        if name.trim().is_empty() || name.chars().any(|c| c.is_control()) {
            return Err(CacheError::InvalidIdentifier(format!("invalid application name '{name}'")));
        }

        // Every used artifact must exist before anything is written.
        let mut identifiers = Vec::with_capacity(uses.len());
        for input in uses {
            let identifier = Self::stored_identifier(input);
            self.require_artifact(&identifier).await?;
            identifiers.push(identifier);
        }

        let app = self.registry.register_app(&name, &root).await?;
        for identifier in &identifiers {
            self.registry.link_usage(identifier, &app.name).await?;
        }
        tracing::info!(app = %app.name, uses = identifiers.len(), "Linked application");
        Ok(LinkReport::new(&app, identifiers))
    }

    /// Unregister an application; its usage links go with it.
    pub async fn unlink(&self, name: &str) -> CacheResult<u64> {
        let released = self.registry.unregister_app(name).await?;
        tracing::info!(app = %name, released, "Unlinked application");
        Ok(released)
    }
}

fn new_artifact(resolved: &ResolvedArtifact) -> NewArtifact {
    NewArtifact {
        identifier: resolved.identifier.to_string(),
        canonical_path: resolved.canonical_path.clone(),
        size_bytes: resolved.size_bytes,
        content_hash: resolved.content_hash,
        source_type: resolved.source_type(),
        is_symlink: resolved.is_symlink,
        symlink_target: resolved.symlink_target.clone(),
    }
}

fn member_from_row(row: &ArtifactRow) -> CacheResult<DedupMember> {
    Ok(DedupMember {
        identifier: row.identifier.clone(),
        source_type: row.source()?,
        canonical_path: row.path(),
        size_bytes: row.size(),
        content_hash: row.hash(),
        is_symlink: row.is_symlink,
        symlink_target: row.target(),
        created_at: Some(row.created_at),
    })
}

fn member_from_resolved(resolved: &ResolvedArtifact) -> DedupMember {
    DedupMember {
        identifier: resolved.identifier.to_string(),
        source_type: resolved.source_type(),
        canonical_path: resolved.canonical_path.clone(),
        size_bytes: resolved.size_bytes,
        content_hash: resolved.content_hash,
        is_symlink: resolved.is_symlink,
        symlink_target: resolved.symlink_target.clone(),
        created_at: None,
    }
}

/// Point the heir and any re-pointed dependents back at `payload`.
async fn restore_links(payload: &Path, heir: &ArtifactRow, relinked: &[&ArtifactRow]) {
    let heir_path = heir.path();
    let heir_result = match tokio::fs::symlink_metadata(&heir_path).await {
        Ok(meta) if meta.is_dir() => match remove_path(&heir_path).await {
            Ok(()) => replace_with_link(&heir_path, payload).await,
            Err(e) => Err(e),
        },
        _ => replace_with_link(&heir_path, payload).await,
    };
    if let Err(e) = heir_result {
        tracing::warn!(path = %heir_path.display(), error = %e, "Failed to restore link");
    }
    for dependent in relinked {
        let path = dependent.path();
        if let Err(e) = replace_with_link(&path, payload).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to restore link");
        }
    }
}
