//! Model hub download adapter (`hf:org/name`).

use super::{RepoId, parse_repo_id};
use crate::error::{SourceError, SourceResult};
use crate::payload::{inspect_async, list_entries};
use crate::staging::StagingGuard;
use crate::traits::{AcquireContext, Progress, ResolvedArtifact, SourceAdapter};
use async_trait::async_trait;
use hoard_core::{ContentHash, HoardConfig, Identifier, SourceType, TreeHasher};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

/// One entry of the hub tree listing.
#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<LfsPointer>,
}

#[derive(Debug, Deserialize)]
struct LfsPointer {
    oid: String,
    size: u64,
}

/// A file to fetch, with what the hub publishes about it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteFile {
    path: String,
    size: Option<u64>,
    sha256: Option<String>,
}

impl TryFrom<TreeEntry> for RemoteFile {
    type Error = SourceError;

    fn try_from(entry: TreeEntry) -> SourceResult<Self> {
        let safe = !entry.path.contains('\\')
            && Path::new(&entry.path)
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe || entry.path.is_empty() {
            return Err(SourceError::Manifest {
                path: entry.path,
                reason: "unsafe path in repository listing".to_string(),
            });
        }
        let (size, sha256) = match entry.lfs {
            Some(lfs) => (Some(lfs.size), Some(lfs.oid.to_ascii_lowercase())),
            None => (entry.size, None),
        };
        Ok(Self {
            path: entry.path,
            size,
            sha256,
        })
    }
}

/// Downloads repositories from a model hub into `<cache_root>/downloads/hf`.
pub struct DownloadAdapter {
    client: reqwest::Client,
    endpoint: String,
    revision: String,
    root: PathBuf,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl DownloadAdapter {
    pub fn new(config: &HoardConfig) -> SourceResult<Self> {
        let timeout = Duration::from_secs(config.download.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!("hoard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.hf_endpoint.trim_end_matches('/').to_string(),
            revision: config.hf_revision.clone(),
            root: config.downloads_dir(),
            max_retries: config.download.max_retries,
            retry_base_delay: Duration::from_millis(config.download.retry_base_delay_ms),
        })
    }

    fn repo_dir(&self, repo: &RepoId<'_>) -> PathBuf {
        self.root.join(repo.dir_name())
    }

    /// Send a GET with exponential backoff on transport errors and 5xx responses.
    async fn get_with_retry(
        &self,
        url: &str,
        ctx: &AcquireContext,
    ) -> SourceResult<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let sent = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(SourceError::Cancelled),
                sent = self.client.get(url).send() => sent,
            };
            let failure = match sent {
                Ok(response) if response.status().is_server_error() => {
                    format!("server error ({})", response.status())
                }
                Ok(response) => return Ok(response),
                Err(e) => format!("request error ({e})"),
            };

            attempt += 1;
            if attempt > self.max_retries {
                return Err(SourceError::TransientIo(format!(
                    "{url}: {failure}, giving up after {attempt} attempts"
                )));
            }
            let delay = backoff(self.retry_base_delay, attempt);
            tracing::warn!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "{failure}, retrying"
            );
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn fetch_listing(
        &self,
        repo: &RepoId<'_>,
        ctx: &AcquireContext,
    ) -> SourceResult<Vec<RemoteFile>> {
        let url = format!(
            "{}/api/models/{}/{}/tree/{}?recursive=true",
            self.endpoint, repo.org, repo.name, self.revision
        );
        let response = check_status(self.get_with_retry(&url, ctx).await?, repo)?;
        let entries: Vec<TreeEntry> = response
            .json()
            .await
            .map_err(|e| SourceError::Manifest {
                path: url.clone(),
                reason: e.to_string(),
            })?;

        entries
            .into_iter()
            .filter(|entry| entry.kind == "file")
            .map(RemoteFile::try_from)
            .collect()
    }

    /// Stream one file to `dest`, hashing as it arrives.
    async fn download_file(
        &self,
        repo: &RepoId<'_>,
        file: &RemoteFile,
        dest: &Path,
        ctx: &AcquireContext,
        progress: &mut Progress,
    ) -> SourceResult<ContentHash> {
        let url = format!(
            "{}/{}/{}/resolve/{}/{}",
            self.endpoint, repo.org, repo.name, self.revision, file.path
        );
        let mut response = check_status(self.get_with_retry(&url, ctx).await?, repo)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(dest).await?;
        let mut hasher = ContentHash::hasher();
        let mut written = 0u64;
        progress.file = file.path.clone();

        loop {
            ctx.check_cancelled()?;
            let chunk = tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(SourceError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|e| {
                    SourceError::TransientIo(format!("{url}: body read failed: {e}"))
                })?,
            };
            let Some(chunk) = chunk else { break };
            hasher.update(&chunk);
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.bytes_done += chunk.len() as u64;
            ctx.report(progress);
        }
        out.sync_all().await?;

        if let Some(expected) = file.size
            && expected != written
        {
            return Err(SourceError::ChecksumMismatch {
                path: file.path.clone(),
                expected: format!("{expected} bytes"),
                actual: format!("{written} bytes"),
            });
        }
        let hash = hasher.finalize();
        if let Some(expected) = &file.sha256
            && *expected != hash.to_hex()
        {
            return Err(SourceError::ChecksumMismatch {
                path: file.path.clone(),
                expected: expected.clone(),
                actual: hash.to_hex(),
            });
        }
        Ok(hash)
    }
}

/// Delay before retry number `attempt` (1-based): the base doubled each time.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.saturating_sub(1).min(31))
}

fn check_status(response: reqwest::Response, repo: &RepoId<'_>) -> SourceResult<reqwest::Response> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SourceError::NotFound(format!("hf:{}/{}", repo.org, repo.name)));
    }
    if !status.is_success() {
        return Err(SourceError::Http(format!(
            "{} returned {status}",
            response.url()
        )));
    }
    Ok(response)
}

#[async_trait]
impl SourceAdapter for DownloadAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Download
    }

    #[instrument(skip(self), fields(source = "hf"))]
    async fn resolve(&self, name: &str) -> SourceResult<ResolvedArtifact> {
        let repo = parse_repo_id(name)?;
        let dir = self.repo_dir(&repo);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(SourceError::NotFound(format!("hf:{name}")));
        }

        let info = inspect_async(dir).await?;
        Ok(ResolvedArtifact {
            identifier: Identifier::new(SourceType::Download, name)?,
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
        Ok(list_entries(&self.root)
            .await?
            .into_iter()
            .filter_map(|dir| {
                let (org, name) = dir.split_once("--")?;
                let id = format!("{org}/{name}");
                parse_repo_id(&id).is_ok().then_some(id)
            })
            .collect())
    }

    #[instrument(skip(self, ctx), fields(source = "hf"))]
    async fn acquire(&self, name: &str, ctx: &AcquireContext) -> SourceResult<ResolvedArtifact> {
        let repo = parse_repo_id(name)?;
        let identifier = Identifier::new(SourceType::Download, name)?;
        let final_dir = self.repo_dir(&repo);
        ctx.check_cancelled()?;

        if tokio::fs::try_exists(&final_dir).await? {
            tracing::debug!(identifier = %identifier, "Already downloaded");
            return self.resolve(name).await;
        }

        let files = self.fetch_listing(&repo, ctx).await?;
        if files.is_empty() {
            return Err(SourceError::NotFound(format!(
                "{identifier} has no files at revision {}",
                self.revision
            )));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let staging = StagingGuard::beside(&final_dir);
        tokio::fs::create_dir_all(staging.path()).await?;

        let mut progress = Progress {
            file: String::new(),
            bytes_done: 0,
            bytes_total: files.iter().map(|f| f.size).sum(),
        };
        let mut tree = TreeHasher::new();
        let mut last = None;
        for file in &files {
            let dest = staging.path().join(&file.path);
            let hash = self
                .download_file(&repo, file, &dest, ctx, &mut progress)
                .await?;
            tree.add(file.path.clone(), hash);
            last = Some(hash);
        }

        // A single-file repository is identified by the file itself.
        let content_hash = match (files.len(), last) {
            (1, Some(hash)) => hash,
            _ => tree.finalize(),
        };

        ctx.check_cancelled()?;
        staging.commit(&final_dir).await?;

        let info = inspect_async(final_dir).await?;
        tracing::info!(
            identifier = %identifier,
            size_bytes = info.size_bytes,
            files = info.file_count,
            "Downloaded artifact"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff(base, 1), base);
        assert_eq!(backoff(base, 3), Duration::from_secs(1));
        assert_eq!(backoff(Duration::MAX, 4), Duration::MAX);
        assert_eq!(backoff(Duration::from_secs(u64::MAX / 2), 11), Duration::MAX);
    }

    #[test]
    fn test_remote_file_prefers_lfs_metadata() {
        let entry: TreeEntry = serde_json::from_str(
            r#"{"type":"file","path":"model.safetensors","size":135,
                "lfs":{"oid":"ABCDEF","size":4096,"pointerSize":135}}"#,
        )
        .unwrap();
        let file = RemoteFile::try_from(entry).unwrap();
        assert_eq!(file.size, Some(4096));
        assert_eq!(file.sha256.as_deref(), Some("abcdef"));
    }

    #[test]
    fn test_remote_file_rejects_traversal() {
        for path in ["../escape", "/etc/passwd", "a/../../b", "a\\b"] {
            let entry = TreeEntry {
                kind: "file".to_string(),
                path: path.to_string(),
                size: Some(1),
                lfs: None,
            };
            assert!(RemoteFile::try_from(entry).is_err(), "{path}");
        }
    }
}
