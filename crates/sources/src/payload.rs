//! On-disk payload inspection shared by the adapters.

use crate::error::{SourceError, SourceResult};
use crate::staging::is_staging_name;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Shape of a payload found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadInfo {
    /// The payload itself: the single file of a one-file tree, otherwise the root.
    pub path: PathBuf,
    pub size_bytes: u64,
    pub file_count: usize,
    /// Set when `path` itself is a symlink.
    pub link_target: Option<PathBuf>,
}

/// Describe the payload rooted at `root`, following symlinks for sizes.
///
/// A directory holding exactly one file collapses to that file, so a
/// one-file repository and a bare blob of the same bytes share an identity.
/// Blocking; call from `spawn_blocking` in async contexts.
pub fn inspect(root: &Path) -> SourceResult<PayloadInfo> {
    let link_target = read_link_if_symlink(root)?;
    let meta = std::fs::metadata(root)?;
    if meta.is_file() {
        return Ok(PayloadInfo {
            path: root.to_path_buf(),
            size_bytes: meta.len(),
            file_count: 1,
            link_target,
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(walk_error)?;
        if entry.file_type().is_file() {
            files.push((entry.path().to_path_buf(), entry.metadata().map_err(walk_error)?.len()));
        }
    }

    if link_target.is_none()
        && let [(path, size)] = files.as_slice()
    {
        return Ok(PayloadInfo {
            link_target: read_link_if_symlink(path)?,
            path: path.clone(),
            size_bytes: *size,
            file_count: 1,
        });
    }

    Ok(PayloadInfo {
        path: root.to_path_buf(),
        size_bytes: files.iter().map(|(_, size)| size).sum(),
        file_count: files.len(),
        link_target,
    })
}

/// Async wrapper around [`inspect`].
pub async fn inspect_async(root: PathBuf) -> SourceResult<PayloadInfo> {
    tokio::task::spawn_blocking(move || inspect(&root))
        .await
        .map_err(|e| SourceError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

/// Names of the visible top-level entries of `dir`; empty when it does not exist.
pub async fn list_entries(dir: &Path) -> SourceResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || is_staging_name(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn read_link_if_symlink(path: &Path) -> SourceResult<Option<PathBuf>> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        Ok(Some(std::fs::read_link(path)?))
    } else {
        Ok(None)
    }
}

fn walk_error(err: walkdir::Error) -> SourceError {
    match err.into_io_error() {
        Some(io) => SourceError::Io(io),
        None => SourceError::Io(std::io::Error::other("filesystem loop while walking payload")),
    }
}
