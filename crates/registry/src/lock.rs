//! Exclusive write lock for the registry.
//!
//! One process-local async mutex plus an advisory file lock next to the
//! database. A second invocation blocks on the file lock until the first
//! finishes its write transaction.

use crate::error::{RegistryError, RegistryResult};
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

pub struct WriteLock {
    path: Option<PathBuf>,
    local: Mutex<()>,
}

/// Held for the duration of one write transaction. Dropping it closes the
/// lock file, which releases the advisory lock.
pub struct WriteGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: Option<File>,
}

impl WriteLock {
    /// Lock file at `<db_path>.lock`.
    pub fn for_database(db_path: &Path) -> Self {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".lock");
        Self {
            path: Some(PathBuf::from(name)),
            local: Mutex::new(()),
        }
    }

    /// In-process lock only, for in-memory databases.
    pub fn process_local() -> Self {
        Self {
            path: None,
            local: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn acquire(&self) -> RegistryResult<WriteGuard<'_>> {
        let local = self.local.lock().await;
        let file = match &self.path {
            None => None,
            Some(path) => {
                let path = path.clone();
                let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
                    let file = OpenOptions::new()
                        .create(true)
                        .read(true)
                        .write(true)
                        .truncate(false)
                        .open(&path)?;
                    file.lock_exclusive()?;
                    Ok(file)
                })
                .await
                .map_err(|e| RegistryError::Lock(format!("lock task failed: {e}")))?
                .map_err(|e| RegistryError::Lock(format!("failed to lock registry: {e}")))?;
                Some(file)
            }
        };
        Ok(WriteGuard {
            _local: local,
            _file: file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_writer_blocks_until_release() {
        let temp = tempfile::tempdir().unwrap();
        let lock = Arc::new(WriteLock::for_database(&temp.path().join("registry.db")));
        let acquired = Arc::new(AtomicBool::new(false));

        let guard = lock.acquire().await.unwrap();
        let task = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire().await.unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!acquired.load(Ordering::SeqCst));

        drop(guard);
        task.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_lock_path_sits_next_to_database() {
        let lock = WriteLock::for_database(Path::new("/var/hoard/registry.db"));
        assert_eq!(lock.path(), Some(Path::new("/var/hoard/registry.db.lock")));
    }
}
