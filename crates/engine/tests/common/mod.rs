//! Isolated cache roots and on-disk store fixtures.
#![allow(dead_code)]

use hoard_core::{ContentHash, HoardConfig};
use hoard_engine::CacheManager;
use hoard_sources::AcquireContext;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestCache {
    pub temp: TempDir,
    pub config: HoardConfig,
    pub manager: CacheManager,
}

impl TestCache {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_endpoint(endpoint: String) -> Self {
        Self::with_config(|config| config.hf_endpoint = endpoint).await
    }

    async fn with_config(adjust: impl FnOnce(&mut HoardConfig)) -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = HoardConfig::for_root(temp.path());
        adjust(&mut config);
        std::fs::create_dir_all(&config.import_roots[0]).unwrap();
        let manager = CacheManager::open(config.clone())
            .await
            .expect("Failed to open cache");
        Self {
            temp,
            config,
            manager,
        }
    }

    pub fn writes(&self) -> u64 {
        self.manager.registry().write_count()
    }

    pub fn ctx() -> AcquireContext {
        AcquireContext::default()
    }

    /// Write a file under the first import root and return its path.
    pub fn import_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.config.import_roots[0].join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Import `bytes` as `local:<name>`.
    pub async fn add_local(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let source = self.import_file(name, bytes);
        let added = self
            .manager
            .add(&format!("local:{}", source.display()), &Self::ctx())
            .await
            .unwrap();
        assert_eq!(added.identifier, format!("local:{name}"));
        added.canonical_path
    }

    /// Application root directory named `name`.
    pub fn app_dir(&self, name: &str) -> PathBuf {
        let dir = self.temp.path().join("apps").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

/// Every file and directory below `dir`, relative, sorted.
pub fn tree(dir: &Path) -> Vec<String> {
    let mut entries: Vec<String> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| e.path().strip_prefix(dir).unwrap().display().to_string())
        .collect();
    entries.sort();
    entries
}

/// Lay out `models--{org}--{name}` with blobs, a snapshot of links, and `refs/main`.
#[cfg(unix)]
pub fn write_hub_repo(hub_dir: &Path, org: &str, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let repo = hub_dir.join(format!("models--{org}--{name}"));
    let rev = "fedcba9876543210fedcba9876543210fedcba98";
    let snapshot = repo.join("snapshots").join(rev);
    std::fs::create_dir_all(repo.join("blobs")).unwrap();
    std::fs::create_dir_all(repo.join("refs")).unwrap();
    std::fs::write(repo.join("refs/main"), rev).unwrap();

    for (path, bytes) in files {
        let blob = repo.join("blobs").join(ContentHash::compute(bytes).to_hex());
        std::fs::write(&blob, bytes).unwrap();
        let link = snapshot.join(path);
        std::fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&blob, &link).unwrap();
    }
    snapshot
}

/// Write a manifest and its model blob; returns the blob path.
pub fn write_ollama_model(ollama_dir: &Path, model: &str, tag: &str, bytes: &[u8]) -> PathBuf {
    let hex = ContentHash::compute(bytes).to_hex();
    let blob = ollama_dir.join("blobs").join(format!("sha256-{hex}"));
    std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
    std::fs::write(&blob, bytes).unwrap();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "layers": [
            {
                "mediaType": "application/vnd.ollama.image.model",
                "digest": format!("sha256:{hex}"),
                "size": bytes.len()
            }
        ]
    });
    let path = ollama_dir
        .join("manifests/registry.ollama.ai/library")
        .join(model)
        .join(tag);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    blob
}
