//! Local import adapter (`local:/path` on import, `local:<basename>` after).

use crate::error::{SourceError, SourceResult};
use crate::payload::{inspect_async, list_entries};
use crate::staging::StagingGuard;
use crate::traits::{AcquireContext, Progress, ResolvedArtifact, SourceAdapter};
use async_trait::async_trait;
use hoard_core::hash::{hash_file, relative_key};
use hoard_core::{
    ContentHash, HoardConfig, IO_CHUNK_SIZE, Identifier, SourceType, TreeHasher, hash_payload,
};
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use walkdir::WalkDir;

/// Copies user-supplied files or directories into `<cache_root>/local`.
pub struct LocalImportAdapter {
    root: PathBuf,
    import_roots: Vec<PathBuf>,
}

/// A file to copy: absolute source and key relative to the import root.
struct ImportFile {
    source: PathBuf,
    relative: String,
    size: u64,
}

impl LocalImportAdapter {
    pub fn new(config: &HoardConfig) -> Self {
        Self {
            root: config.local_dir(),
            import_roots: config.import_roots.clone(),
        }
    }

    /// Canonicalize `path` and require it to sit inside an allow-listed root.
    fn check_allowed(roots: &[PathBuf], path: &Path) -> SourceResult<PathBuf> {
        let canonical = path.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
            _ => SourceError::Io(e),
        })?;
        let allowed = roots
            .iter()
            .filter_map(|root| root.canonicalize().ok())
            .any(|root| canonical.starts_with(root));
        if !allowed {
            return Err(SourceError::NotAllowed(format!(
                "{} is outside the configured import roots",
                path.display()
            )));
        }
        Ok(canonical)
    }

    /// Enumerate the files of an import source, rejecting symlink escapes.
    fn plan_import(roots: &[PathBuf], source: &Path) -> SourceResult<Vec<ImportFile>> {
        let meta = std::fs::metadata(source)?;
        if meta.is_file() {
            return Ok(vec![ImportFile {
                source: source.to_path_buf(),
                relative: String::new(),
                size: meta.len(),
            }]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(source).follow_links(true) {
            let entry = entry.map_err(|e| {
                SourceError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::other("filesystem loop in import source")
                }))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let resolved = Self::check_allowed(roots, entry.path())?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| SourceError::Io(std::io::Error::other(e.to_string())))?;
            files.push(ImportFile {
                size: std::fs::metadata(&resolved)?.len(),
                source: resolved,
                relative: relative_key(rel),
            });
        }
        Ok(files)
    }

    fn target_dir(&self) -> &Path {
        &self.root
    }

    /// Resolve an earlier import of the same name, but only if it holds the
    /// same content as `source`.
    async fn reuse_existing(
        &self,
        identifier: &Identifier,
        source: &Path,
        files: Vec<ImportFile>,
        ctx: &AcquireContext,
    ) -> SourceResult<ResolvedArtifact> {
        let existing = self.resolve(identifier.name()).await?;
        let incoming_size: u64 = files.iter().map(|f| f.size).sum();
        let conflict = || {
            SourceError::AlreadyExists(format!(
                "{identifier} already holds different content than {}",
                source.display()
            ))
        };
        if existing.size_bytes != incoming_size {
            return Err(conflict());
        }

        let stored_path = existing.canonical_path.clone();
        let cancel = ctx.cancel.clone();
        let (incoming, stored) = tokio::task::spawn_blocking(move || {
            let incoming = hash_import(&files, &cancel)?;
            let stored = hash_payload(&stored_path, &cancel)?;
            Ok::<_, hoard_core::Error>((incoming, stored))
        })
        .await
        .map_err(|e| SourceError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;
        if incoming != stored {
            return Err(conflict());
        }

        tracing::debug!(identifier = %identifier, "Already imported");
        Ok(ResolvedArtifact {
            content_hash: Some(stored),
            ..existing
        })
    }
}

/// Content hash an import source the way its copy will be identified.
fn hash_import(files: &[ImportFile], cancel: &CancellationToken) -> hoard_core::Result<ContentHash> {
    if let [file] = files {
        return hash_file(&file.source, cancel);
    }
    let mut tree = TreeHasher::new();
    for file in files {
        tree.add(file.relative.clone(), hash_file(&file.source, cancel)?);
    }
    Ok(tree.finalize())
}

/// Validate a stored local name: one plain path segment.
fn check_basename(name: &str) -> SourceResult<()> {
    let mut components = Path::new(name).components();
    let plain = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.starts_with('.')
        && !name.chars().any(|c| c.is_control());
    if !plain {
        return Err(SourceError::InvalidIdentifier(format!(
            "'{name}' is not a valid local artifact name"
        )));
    }
    Ok(())
}

/// Whether `name` names a filesystem path to import rather than an imported artifact.
fn is_import_path(name: &str) -> bool {
    let path = Path::new(name);
    path.is_absolute() || path.components().count() > 1 || name.starts_with('.')
}

/// Copy `source` to `dest` in fixed-size chunks, hashing on the way.
async fn copy_hashed(
    source: &Path,
    dest: &Path,
    ctx: &AcquireContext,
    progress: &mut Progress,
) -> SourceResult<ContentHash> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut input = tokio::fs::File::open(source).await?;
    let mut output = tokio::fs::File::create(dest).await?;
    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; IO_CHUNK_SIZE];

    loop {
        ctx.check_cancelled()?;
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n]).await?;
        progress.bytes_done += n as u64;
        ctx.report(progress);
    }
    output.sync_all().await?;
    Ok(hasher.finalize())
}

#[async_trait]
impl SourceAdapter for LocalImportAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::LocalImport
    }

    #[instrument(skip(self), fields(source = "local"))]
    async fn resolve(&self, name: &str) -> SourceResult<ResolvedArtifact> {
        check_basename(name)?;
        let path = self.target_dir().join(name);
        if tokio::fs::symlink_metadata(&path).await.is_err() {
            return Err(SourceError::NotFound(format!("local:{name}")));
        }

        let info = inspect_async(path).await?;
        Ok(ResolvedArtifact {
            identifier: Identifier::new(SourceType::LocalImport, name)?,
            canonical_path: info.path,
            size_bytes: info.size_bytes,
            content_hash: None,
            is_symlink: info.link_target.is_some(),
            symlink_target: info.link_target,
            file_count: info.file_count,
            newly_written: false,
        })
    }

    async fn list_available(&self) -> SourceResult<Vec<String>> {
        list_entries(&self.root).await
    }

    #[instrument(skip(self, ctx), fields(source = "local"))]
    async fn acquire(&self, name: &str, ctx: &AcquireContext) -> SourceResult<ResolvedArtifact> {
        ctx.check_cancelled()?;
        if !is_import_path(name) {
            return self.resolve(name).await;
        }

        let roots = self.import_roots.clone();
        let requested = PathBuf::from(name);
        let (source, files) = tokio::task::spawn_blocking(move || {
            let source = Self::check_allowed(&roots, &requested)?;
            let files = Self::plan_import(&roots, &source)?;
            Ok::<_, SourceError>((source, files))
        })
        .await
        .map_err(|e| SourceError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;

        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SourceError::InvalidIdentifier(format!("'{name}' has no file name")))?;
        check_basename(&basename)?;
        let identifier = Identifier::new(SourceType::LocalImport, &basename)?;

        if files.is_empty() {
            return Err(SourceError::NotFound(format!("{name} contains no files")));
        }
        let dest = self.root.join(&basename);
        if tokio::fs::symlink_metadata(&dest).await.is_ok() {
            return self.reuse_existing(&identifier, &source, files, ctx).await;
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = StagingGuard::beside(&dest);
        let mut progress = Progress {
            file: String::new(),
            bytes_done: 0,
            bytes_total: Some(files.iter().map(|f| f.size).sum()),
        };

        let single_file = matches!(files.as_slice(), [f] if f.relative.is_empty());
        let content_hash = if single_file {
            copy_hashed(&source, staging.path(), ctx, &mut progress).await?
        } else {
            tokio::fs::create_dir_all(staging.path()).await?;
            let mut tree = TreeHasher::new();
            let mut last = None;
            for file in &files {
                progress.file = file.relative.clone();
                let hash = copy_hashed(
                    &file.source,
                    &staging.path().join(&file.relative),
                    ctx,
                    &mut progress,
                )
                .await?;
                tree.add(file.relative.clone(), hash);
                last = Some(hash);
            }
            match (files.len(), last) {
                (1, Some(hash)) => hash,
                _ => tree.finalize(),
            }
        };

        ctx.check_cancelled()?;
        staging.commit(&dest).await?;

        let info = inspect_async(dest).await?;
        tracing::info!(
            identifier = %identifier,
            from = %source.display(),
            size_bytes = info.size_bytes,
            "Imported local artifact"
        );
        Ok(ResolvedArtifact {
            identifier,
            canonical_path: info.path,
            size_bytes: info.size_bytes,
            content_hash: Some(content_hash),
            is_symlink: false,
            symlink_target: None,
            file_count: info.file_count,
            newly_written: true,
        })
    }
}
