//! Source types and source-qualified artifact identifiers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of store an artifact was discovered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Pulled from a model hub into the hoard cache.
    Download,
    /// Found by scanning a content-addressable hub cache on disk.
    NativeCacheScan,
    /// Lives in a foreign inference tool's blob store; tracked through a link.
    ForeignSymlink,
    /// Copied into the hoard cache from a user-specified path.
    LocalImport,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::Download,
        SourceType::NativeCacheScan,
        SourceType::ForeignSymlink,
        SourceType::LocalImport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::NativeCacheScan => "native-cache-scan",
            Self::ForeignSymlink => "foreign-symlink",
            Self::LocalImport => "local-import",
        }
    }

    /// Identifier scheme for this source.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Download => "hf",
            Self::NativeCacheScan => "hub",
            Self::ForeignSymlink => "ollama",
            Self::LocalImport => "local",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.scheme() == scheme)
    }

    /// Whether the payload is owned by another tool and must never be
    /// deleted or replaced by hoard.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::NativeCacheScan | Self::ForeignSymlink)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    /// Accepts either the source type name or its scheme.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower || t.scheme() == lower)
            .ok_or_else(|| Error::UnknownSource(s.to_string()))
    }
}

/// A source-qualified artifact identifier, rendered as `scheme:name`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    source: SourceType,
    name: String,
}

impl Identifier {
    /// Parse `scheme:name` or `scheme://name`.
    ///
    /// Only scheme-level checks happen here; each source adapter applies its
    /// own stricter name validation before touching the filesystem or network.
    pub fn parse(s: &str) -> Result<Self> {
        let (scheme, rest) = match s.split_once("://") {
            Some(parts) => parts,
            None => s.split_once(':').ok_or_else(|| {
                Error::InvalidIdentifier(format!("missing source scheme in '{s}'"))
            })?,
        };
        let source = SourceType::from_scheme(&scheme.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownSource(scheme.to_string()))?;
        Self::new(source, rest)
    }

    pub fn new(source: SourceType, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidIdentifier("name cannot be empty".to_string()));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidIdentifier(
                "name contains control characters".to_string(),
            ));
        }

        let name = match source {
            // Foreign tool names default to the `latest` tag.
            SourceType::ForeignSymlink if !name.contains(':') => format!("{name}:latest"),
            _ => name.to_string(),
        };

        Ok(Self { source, name })
    }

    pub fn source(&self) -> SourceType {
        self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.scheme(), self.name)
    }
}
