//! Fixtures that lay out foreign stores on disk.
#![allow(dead_code)]

use hoard_core::{ContentHash, HoardConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An isolated hoard root with config pointing into it.
pub struct TestRoot {
    pub temp: TempDir,
    pub config: HoardConfig,
}

impl TestRoot {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("Failed to create temp directory");
        let config = HoardConfig::for_root(temp.path());
        std::fs::create_dir_all(&config.import_roots[0]).unwrap();
        Self { temp, config }
    }

    pub fn with_endpoint(endpoint: String) -> Self {
        let mut root = Self::new();
        root.config.hf_endpoint = endpoint;
        root
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
}

/// Lay out `models--{org}--{name}` with blobs, a snapshot of links, and `refs/main`.
#[cfg(unix)]
pub fn write_hub_repo(hub_dir: &Path, org: &str, name: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let repo = hub_dir.join(format!("models--{org}--{name}"));
    let rev = "0123456789abcdef0123456789abcdef01234567";
    let snapshot = repo.join("snapshots").join(rev);
    std::fs::create_dir_all(repo.join("blobs")).unwrap();
    std::fs::create_dir_all(repo.join("refs")).unwrap();
    std::fs::write(repo.join("refs/main"), rev).unwrap();

    for (path, bytes) in files {
        let blob_name = ContentHash::compute(bytes).to_hex();
        std::fs::write(repo.join("blobs").join(&blob_name), bytes).unwrap();
        let link = snapshot.join(path);
        std::fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(repo.join("blobs").join(&blob_name), &link).unwrap();
    }
    snapshot
}

/// Write an OCI-style manifest and its model blob; returns the blob path.
pub fn write_ollama_model(ollama_dir: &Path, model: &str, tag: &str, bytes: &[u8]) -> PathBuf {
    let hex = ContentHash::compute(bytes).to_hex();
    let blob = ollama_dir.join("blobs").join(format!("sha256-{hex}"));
    std::fs::create_dir_all(blob.parent().unwrap()).unwrap();
    std::fs::write(&blob, bytes).unwrap();
    write_ollama_manifest(ollama_dir, model, tag, &hex, bytes.len() as u64);
    blob
}

pub fn write_ollama_manifest(ollama_dir: &Path, model: &str, tag: &str, hex: &str, size: u64) {
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "digest": format!("sha256:{}", "0".repeat(64)),
            "size": 485
        },
        "layers": [
            {
                "mediaType": "application/vnd.ollama.image.license",
                "digest": format!("sha256:{}", "1".repeat(64)),
                "size": 12
            },
            {
                "mediaType": "application/vnd.ollama.image.model",
                "digest": format!("sha256:{hex}"),
                "size": size
            }
        ]
    });
    let path = ollama_dir
        .join("manifests/registry.ollama.ai/library")
        .join(model)
        .join(tag);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(&manifest).unwrap()).unwrap();
}
