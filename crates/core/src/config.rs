//! Configuration for hoard.
//!
//! Every component receives the cache root and store locations explicitly from
//! a [`HoardConfig`]; nothing reads process-wide state after loading.

use crate::{Error, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HoardConfig {
    /// Root of the hoard cache tree.
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    /// Registry database location (default: `<cache_root>/registry.db`).
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Content-addressable hub cache to scan (`models--org--name` layout).
    #[serde(default = "default_hub_cache_dir")]
    pub hub_cache_dir: PathBuf,
    /// Foreign inference tool model store (`manifests/` + `blobs/`).
    #[serde(default = "default_ollama_dir")]
    pub ollama_dir: PathBuf,
    /// Model hub HTTP endpoint used for downloads.
    #[serde(default = "default_hf_endpoint")]
    pub hf_endpoint: String,
    /// Revision downloaded when none is given.
    #[serde(default = "default_hf_revision")]
    pub hf_revision: String,
    /// Directories local imports may be read from.
    #[serde(default = "default_import_roots")]
    pub import_roots: Vec<PathBuf>,
    /// Download retry and timeout policy.
    #[serde(default)]
    pub download: DownloadConfig,
}

/// Download retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Retries after the first attempt before a transient error is surfaced.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Per-request connect and read timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// Upper bound for `download.retry_base_delay_ms`.
pub const MAX_RETRY_BASE_DELAY_MS: u64 = 60_000;

fn default_retry_base_delay_ms() -> u64 {
    1000 // 1s, 2s, 4s
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_hf_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_hf_revision() -> String {
    "main".to_string()
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_cache_root() -> PathBuf {
    match std::env::var_os("XDG_CACHE_HOME") {
        Some(path) => PathBuf::from(path).join("hoard"),
        None => home_dir().join(".cache").join("hoard"),
    }
}

fn default_hub_cache_dir() -> PathBuf {
    if let Some(path) = std::env::var_os("HF_HUB_CACHE") {
        return PathBuf::from(path);
    }
    match std::env::var_os("HF_HOME") {
        Some(path) => PathBuf::from(path).join("hub"),
        None => home_dir().join(".cache").join("huggingface").join("hub"),
    }
}

fn default_ollama_dir() -> PathBuf {
    match std::env::var_os("OLLAMA_MODELS") {
        Some(path) => PathBuf::from(path),
        None => home_dir().join(".ollama").join("models"),
    }
}

fn default_import_roots() -> Vec<PathBuf> {
    vec![home_dir()]
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            registry_path: None,
            hub_cache_dir: default_hub_cache_dir(),
            ollama_dir: default_ollama_dir(),
            hf_endpoint: default_hf_endpoint(),
            hf_revision: default_hf_revision(),
            import_roots: default_import_roots(),
            download: DownloadConfig::default(),
        }
    }
}

impl HoardConfig {
    /// A configuration rooted entirely under `root`, for tests and sandboxes.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            cache_root: root.join("cache"),
            registry_path: None,
            hub_cache_dir: root.join("hub"),
            ollama_dir: root.join("ollama"),
            hf_endpoint: default_hf_endpoint(),
            hf_revision: default_hf_revision(),
            import_roots: vec![root.join("imports")],
            download: DownloadConfig {
                max_retries: 2,
                retry_base_delay_ms: 1,
                timeout_secs: 5,
            },
        }
    }

    /// Load from defaults, then the TOML file (if present), then `HOARD_*` env vars.
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(HoardConfig::default()));
        tracing::debug!(path = %path.display(), exists = path.exists(), "Loading configuration");
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("HOARD_").split("__").ignore(&["config"]));

        let config: HoardConfig = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(Error::Config("cache_root cannot be empty".to_string()));
        }
        if !self.hf_endpoint.starts_with("http://") && !self.hf_endpoint.starts_with("https://") {
            return Err(Error::Config(
                "hf_endpoint must start with http:// or https://".to_string(),
            ));
        }
        if self.hf_revision.is_empty() || self.hf_revision.contains("..") {
            return Err(Error::Config(format!(
                "invalid hf_revision: '{}'",
                self.hf_revision
            )));
        }
        if self.download.max_retries > 10 {
            return Err(Error::Config(
                "download.max_retries must be at most 10".to_string(),
            ));
        }
        if self.download.retry_base_delay_ms > MAX_RETRY_BASE_DELAY_MS {
            return Err(Error::Config(format!(
                "download.retry_base_delay_ms must be at most {MAX_RETRY_BASE_DELAY_MS}"
            )));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("registry.db"))
    }

    /// Namespaced directory for hub downloads.
    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_root.join("downloads").join("hf")
    }

    /// Namespaced directory for local imports.
    pub fn local_dir(&self) -> PathBuf {
        self.cache_root.join("local")
    }

    /// Namespaced directory for links into foreign stores.
    pub fn foreign_dir(&self) -> PathBuf {
        self.cache_root.join("foreign").join("ollama")
    }
}

/// Default config file location (`$XDG_CONFIG_HOME/hoard/config.toml`).
pub fn default_config_path() -> PathBuf {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(path) => PathBuf::from(path),
        None => home_dir().join(".config"),
    };
    base.join("hoard").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = HoardConfig::load(&temp.path().join("missing.toml")).unwrap();
        assert_eq!(config.hf_revision, "main");
        assert_eq!(config.download.max_retries, 3);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
cache_root = "/srv/hoard"
hf_endpoint = "http://127.0.0.1:9000"

[download]
max_retries = 1
"#,
        )
        .unwrap();

        let config = HoardConfig::load(&path).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/srv/hoard"));
        assert_eq!(config.registry_path(), PathBuf::from("/srv/hoard/registry.db"));
        assert_eq!(config.download.max_retries, 1);
        assert_eq!(config.download.retry_base_delay_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = HoardConfig::for_root("/tmp/x");
        config.hf_endpoint = "ftp://mirror".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_bounds_retry_delay() {
        let mut config = HoardConfig::for_root("/tmp/x");
        config.download.retry_base_delay_ms = MAX_RETRY_BASE_DELAY_MS;
        assert!(config.validate().is_ok());
        config.download.retry_base_delay_ms = u64::MAX;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_namespaced_dirs_do_not_overlap() {
        let config = HoardConfig::for_root("/tmp/x");
        let dirs = [
            config.downloads_dir(),
            config.local_dir(),
            config.foreign_dir(),
        ];
        for (i, a) in dirs.iter().enumerate() {
            for b in dirs.iter().skip(i + 1) {
                assert!(!a.starts_with(b) && !b.starts_with(a));
            }
        }
    }
}
