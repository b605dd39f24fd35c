//! Source adapter implementations.

pub mod download;
pub mod hub_cache;
pub mod local;
pub mod ollama;

pub use download::DownloadAdapter;
pub use hub_cache::HubCacheAdapter;
pub use local::LocalImportAdapter;
pub use ollama::OllamaAdapter;

use crate::error::{SourceError, SourceResult};
use hoard_core::MAX_NAME_LEN;

/// A validated `org/name` repository id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId<'a> {
    pub org: &'a str,
    pub name: &'a str,
}

impl RepoId<'_> {
    /// Flat directory name, `org--name`.
    pub fn dir_name(&self) -> String {
        format!("{}--{}", self.org, self.name)
    }
}

/// Validate a hub repository id before any filesystem or network access.
///
/// Exactly one `/`, at most [`MAX_NAME_LEN`] characters, segments limited to
/// `[A-Za-z0-9_.-]` and never `.` or `..`.
pub fn parse_repo_id(id: &str) -> SourceResult<RepoId<'_>> {
    let invalid = |reason: &str| SourceError::InvalidIdentifier(format!("'{id}': {reason}"));

    if id.is_empty() || id.len() > MAX_NAME_LEN {
        return Err(invalid("must be between 1 and 256 characters"));
    }
    let (org, name) = match id.split_once('/') {
        Some((org, name)) if !name.contains('/') => (org, name),
        _ => return Err(invalid("expected exactly one '/' (org/name)")),
    };
    for segment in [org, name] {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("empty or relative path segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(invalid("only letters, digits, '_', '.', '-' are allowed"));
        }
    }
    Ok(RepoId { org, name })
}
