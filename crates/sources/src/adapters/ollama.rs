//! Foreign inference tool store (`ollama:name[:tag]`).
//!
//! Manifests live at `manifests/<registry>/<namespace>/<model>/<tag>` and
//! reference content-addressed blobs at `blobs/sha256-<hex>`. Hoard tracks a
//! model through a link file it owns under `<cache_root>/foreign/ollama`; the
//! blob itself always belongs to the tool.

use crate::error::{SourceError, SourceResult};
use crate::staging::StagingGuard;
use crate::traits::{AcquireContext, ResolvedArtifact, SourceAdapter};
use async_trait::async_trait;
use hoard_core::{HoardConfig, Identifier, SourceType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::instrument;
use walkdir::WalkDir;

const DEFAULT_REGISTRY: &str = "registry.ollama.ai";
const DEFAULT_NAMESPACE: &str = "library";
const MODEL_LAYER: &str = "application/vnd.ollama.image.model";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Layer {
    media_type: String,
    digest: String,
    size: u64,
}

/// A model reference split into its manifest coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelRef {
    registry: String,
    namespace: String,
    model: String,
    tag: String,
}

impl ModelRef {
    fn parse(name: &str) -> SourceResult<Self> {
        let invalid = |reason: &str| SourceError::InvalidIdentifier(format!("'{name}': {reason}"));
        let (path, tag) = name.rsplit_once(':').unwrap_or((name, "latest"));

        let segments: Vec<&str> = path.split('/').collect();
        let (registry, namespace, model) = match segments.as_slice() {
            [model] => (DEFAULT_REGISTRY, DEFAULT_NAMESPACE, *model),
            [namespace, model] => (DEFAULT_REGISTRY, *namespace, *model),
            [registry, namespace, model] => (*registry, *namespace, *model),
            _ => return Err(invalid("expected [registry/][namespace/]model[:tag]")),
        };
        for part in [registry, namespace, model, tag] {
            let ok = !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
            if !ok {
                return Err(invalid("only letters, digits, '_', '.', '-' are allowed"));
            }
        }

        Ok(Self {
            registry: registry.to_string(),
            namespace: namespace.to_string(),
            model: model.to_string(),
            tag: tag.to_string(),
        })
    }

    /// The shortest name that parses back to this reference.
    fn display_name(&self) -> String {
        match (self.registry.as_str(), self.namespace.as_str()) {
            (DEFAULT_REGISTRY, DEFAULT_NAMESPACE) => format!("{}:{}", self.model, self.tag),
            (DEFAULT_REGISTRY, ns) => format!("{ns}/{}:{}", self.model, self.tag),
            (reg, ns) => format!("{reg}/{ns}/{}:{}", self.model, self.tag),
        }
    }

    /// Flat file name for the hoard-owned link.
    fn slug(&self) -> String {
        self.display_name().replace(['/', ':'], "--")
    }

    fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join("manifests")
            .join(&self.registry)
            .join(&self.namespace)
            .join(&self.model)
            .join(&self.tag)
    }
}

pub struct OllamaAdapter {
    root: PathBuf,
    links: PathBuf,
}

impl OllamaAdapter {
    pub fn new(config: &HoardConfig) -> Self {
        Self {
            root: config.ollama_dir.clone(),
            links: config.foreign_dir(),
        }
    }

    /// Locate and verify the model weights blob for `model`.
    async fn model_blob(&self, model: &ModelRef) -> SourceResult<(PathBuf, u64)> {
        let manifest_path = self.manifest_path_checked(model).await?;
        let raw = tokio::fs::read(&manifest_path).await?;
        let manifest: Manifest =
            serde_json::from_slice(&raw).map_err(|e| SourceError::Manifest {
                path: manifest_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let layer = manifest
            .layers
            .iter()
            .find(|layer| layer.media_type == MODEL_LAYER)
            .ok_or_else(|| SourceError::Manifest {
                path: manifest_path.display().to_string(),
                reason: "no model layer".to_string(),
            })?;
        let hex = layer
            .digest
            .strip_prefix("sha256:")
            .filter(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| SourceError::Manifest {
                path: manifest_path.display().to_string(),
                reason: format!("unsupported digest '{}'", layer.digest),
            })?;

        let blob = self.root.join("blobs").join(format!("sha256-{hex}"));
        let meta = match tokio::fs::metadata(&blob).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(format!(
                    "blob {} for ollama:{}",
                    blob.display(),
                    model.display_name()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.len() != layer.size {
            return Err(SourceError::ChecksumMismatch {
                path: blob.display().to_string(),
                expected: format!("{} bytes", layer.size),
                actual: format!("{} bytes", meta.len()),
            });
        }
        Ok((blob, layer.size))
    }

    async fn manifest_path_checked(&self, model: &ModelRef) -> SourceResult<PathBuf> {
        let path = model.manifest_path(&self.root);
        if !tokio::fs::try_exists(&path).await? {
            return Err(SourceError::NotFound(format!(
                "ollama:{}",
                model.display_name()
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl SourceAdapter for OllamaAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::ForeignSymlink
    }

    #[instrument(skip(self), fields(source = "ollama"))]
    async fn resolve(&self, name: &str) -> SourceResult<ResolvedArtifact> {
        let model = ModelRef::parse(name)?;
        let (blob, size) = self.model_blob(&model).await?;

        Ok(ResolvedArtifact {
            identifier: Identifier::new(SourceType::ForeignSymlink, &model.display_name())?,
            canonical_path: self.links.join(model.slug()),
            size_bytes: size,
            content_hash: None,
            is_symlink: true,
            symlink_target: Some(blob),
            file_count: 1,
            newly_written: false,
        })
    }

    async fn list_available(&self) -> SourceResult<Vec<String>> {
        let manifests = self.root.join("manifests");
        let mut names = tokio::task::spawn_blocking(move || -> Vec<String> {
            WalkDir::new(&manifests)
                .min_depth(4)
                .max_depth(4)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let rel = entry.path().strip_prefix(&manifests).ok()?;
                    let parts: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    let [registry, namespace, model, tag] = parts.as_slice() else {
                        return None;
                    };
                    let candidate = format!("{registry}/{namespace}/{model}:{tag}");
                    ModelRef::parse(&candidate).ok().map(|m| m.display_name())
                })
                .collect()
        })
        .await
        .map_err(|e| SourceError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?;
        names.sort();
        Ok(names)
    }

    /// Create (or refresh) the hoard-owned link to the foreign blob.
    #[instrument(skip(self, ctx), fields(source = "ollama"))]
    async fn acquire(&self, name: &str, ctx: &AcquireContext) -> SourceResult<ResolvedArtifact> {
        ctx.check_cancelled()?;
        let mut resolved = self.resolve(name).await?;
        let Some(target) = resolved.symlink_target.clone() else {
            return Ok(resolved);
        };

        let link = &resolved.canonical_path;
        if let Ok(existing) = tokio::fs::read_link(link).await
            && existing == target
        {
            return Ok(resolved);
        }

        tokio::fs::create_dir_all(&self.links).await?;
        let staging = StagingGuard::beside(link);
        symlink(&target, staging.path()).await?;
        staging.commit(link).await?;

        tracing::info!(
            identifier = %resolved.identifier,
            target = %target.display(),
            "Linked foreign model"
        );
        resolved.newly_written = true;
        Ok(resolved)
    }
}

#[cfg(unix)]
async fn symlink(target: &Path, link: &Path) -> SourceResult<()> {
    tokio::fs::symlink(target, link).await?;
    Ok(())
}

#[cfg(windows)]
async fn symlink(target: &Path, link: &Path) -> SourceResult<()> {
    tokio::fs::symlink_file(target, link).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ref_defaults() {
        let m = ModelRef::parse("llama3.2").unwrap();
        assert_eq!(m.registry, DEFAULT_REGISTRY);
        assert_eq!(m.namespace, DEFAULT_NAMESPACE);
        assert_eq!(m.tag, "latest");
        assert_eq!(m.display_name(), "llama3.2:latest");
    }

    #[test]
    fn test_model_ref_namespaced() {
        let m = ModelRef::parse("someone/custom:q4").unwrap();
        assert_eq!(m.namespace, "someone");
        assert_eq!(m.display_name(), "someone/custom:q4");
        assert_eq!(m.slug(), "someone--custom--q4");
    }

    #[test]
    fn test_model_ref_rejects_traversal() {
        assert!(ModelRef::parse("../../etc:passwd").is_err());
        assert!(ModelRef::parse("a/b/c/d:tag").is_err());
        assert!(ModelRef::parse("model:").is_err());
    }
}
