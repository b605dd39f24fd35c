//! Filesystem steps behind linking, promotion, and crash recovery.
//!
//! Every step that replaces a cache path does so with a rename, so the path
//! always holds either the old payload or the new link. Payload bytes that
//! must survive a replacement are kept under a backup name beside the
//! original until the registry agrees with the new state.

use crate::error::{CacheError, CacheResult};
use hoard_sources::staging::StagingGuard;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

const BACKUP_MARKER: &str = ".hoard-backup-";

/// A fresh backup name beside `path`: `.<name>.hoard-backup-<uuid>`.
pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{BACKUP_MARKER}{}", Uuid::new_v4()))
}

/// The path a backup was taken of, if `path` is a backup name.
pub(crate) fn backup_origin(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let (original, id) = name.strip_prefix('.')?.rsplit_once(BACKUP_MARKER)?;
    if original.is_empty() || Uuid::parse_str(id).is_err() {
        return None;
    }
    Some(path.with_file_name(original))
}

/// Delete a file, link, or directory tree. Links are removed, never followed.
pub(crate) async fn remove_path(path: &Path) -> CacheResult<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

/// Whether `path` is a symlink or absent, i.e. safe to replace with a payload.
pub(crate) async fn is_link_or_missing(path: &Path) -> CacheResult<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => Ok(meta.file_type().is_symlink()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Atomically point the link at `link` to `target`.
pub(crate) async fn replace_with_link(link: &Path, target: &Path) -> CacheResult<()> {
    let staging = StagingGuard::beside(link);
    symlink(target, staging.path()).await?;
    staging.commit(link).await?;
    Ok(())
}

/// Mirror `source` into `dest` with hard links, leaving `source` in place.
///
/// Files share their inode with the original; directories are recreated and
/// links inside the tree are copied as links.
pub(crate) async fn hard_link_tree(source: &Path, dest: &Path) -> CacheResult<()> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if !std::fs::symlink_metadata(&source)?.is_dir() {
            return std::fs::hard_link(&source, &dest);
        }
        for entry in WalkDir::new(&source) {
            let entry = entry.map_err(std::io::Error::other)?;
            let rel = entry
                .path()
                .strip_prefix(&source)
                .map_err(std::io::Error::other)?;
            let target = dest.join(rel);
            let file_type = entry.file_type();
            if file_type.is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if file_type.is_symlink() {
                symlink_blocking(&std::fs::read_link(entry.path())?, &target)?;
            } else {
                std::fs::hard_link(entry.path(), &target)?;
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| CacheError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;
    Ok(())
}

/// Put a backup back in place of whatever now sits at `path`.
pub(crate) async fn restore_backup(backup: &Path, path: &Path) -> CacheResult<()> {
    let backup_is_dir = tokio::fs::symlink_metadata(backup).await?.is_dir();
    if backup_is_dir {
        remove_path(path).await?;
    }
    tokio::fs::rename(backup, path).await?;
    Ok(())
}

/// Backups under `dirs`, paired with the path each was taken of.
pub(crate) async fn find_backups(dirs: Vec<PathBuf>) -> CacheResult<Vec<(PathBuf, PathBuf)>> {
    tokio::task::spawn_blocking(move || {
        let mut found = Vec::new();
        for dir in dirs {
            let mut walker = WalkDir::new(dir).min_depth(1).into_iter();
            while let Some(entry) = walker.next() {
                let Ok(entry) = entry else { continue };
                if let Some(origin) = backup_origin(entry.path()) {
                    if entry.file_type().is_dir() {
                        walker.skip_current_dir();
                    }
                    found.push((entry.into_path(), origin));
                }
            }
        }
        found
    })
    .await
    .map_err(|e| CacheError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))
}

#[cfg(unix)]
pub(crate) async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
pub(crate) async fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(target).await?.is_dir() {
        tokio::fs::symlink_dir(target, link).await
    } else {
        tokio::fs::symlink_file(target, link).await
    }
}

#[cfg(unix)]
fn symlink_blocking(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_blocking(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_names_round_trip_to_their_origin() {
        let path = Path::new("/cache/local/model.gguf");
        let backup = backup_path(path);
        assert_eq!(backup.parent(), path.parent());
        assert_eq!(backup_origin(&backup).as_deref(), Some(path));

        assert_eq!(backup_origin(Path::new("/cache/local/model.gguf")), None);
        assert_eq!(backup_origin(Path::new("/cache/local/.model.hoard-backup-nope")), None);
    }

    #[tokio::test]
    async fn test_hard_link_tree_keeps_source() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("repo");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("config.json"), b"{}").unwrap();
        std::fs::write(source.join("nested/weights.bin"), b"weights").unwrap();

        let dest = temp.path().join("copy");
        hard_link_tree(&source, &dest).await.unwrap();
        assert_eq!(std::fs::read(dest.join("nested/weights.bin")).unwrap(), b"weights");
        assert_eq!(std::fs::read(source.join("config.json")).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_find_backups_skips_backup_contents() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().to_path_buf();
        let model = dir.join("org--model");
        let backup = backup_path(&model);
        std::fs::create_dir_all(&backup).unwrap();
        std::fs::write(backup.join("weights.bin"), b"weights").unwrap();
        std::fs::write(dir.join("plain.gguf"), b"plain").unwrap();

        let found = find_backups(vec![dir]).await.unwrap();
        assert_eq!(found, vec![(backup, model)]);
    }
}
