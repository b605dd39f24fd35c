//! Content hash types and streaming hashing of model payloads.

use crate::{Error, IO_CHUNK_SIZE, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Domain separator for directory tree hashes.
const TREE_HASH_DOMAIN: &[u8] = b"hoard-tree-v1\0";

/// A SHA-256 content hash represented as 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create a new ContentHash from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute SHA-256 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ContentHasher {
        ContentHasher(Sha256::new())
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(Error::InvalidHash(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk).map_err(|e| Error::InvalidHash(e.to_string()))?;
            bytes[i] =
                u8::from_str_radix(hex_str, 16).map_err(|e| Error::InvalidHash(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 hasher.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        ContentHash(self.0.finalize().into())
    }
}

/// Builds the identity of a directory payload from per-file digests.
///
/// Entries may be added in any order; they are sorted by relative path bytes
/// before hashing. Relative paths always use `/` separators.
#[derive(Default)]
pub struct TreeHasher {
    entries: Vec<(String, ContentHash)>,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, relative_path: impl Into<String>, hash: ContentHash) {
        self.entries.push((relative_path.into(), hash));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finalize(mut self) -> ContentHash {
        self.entries
            .sort_by(|(a, _), (b, _)| a.as_bytes().cmp(b.as_bytes()));
        let mut hasher = ContentHash::hasher();
        hasher.update(TREE_HASH_DOMAIN);
        for (path, hash) in &self.entries {
            hasher.update(path.as_bytes());
            hasher.update(&[0]);
            hasher.update(hash.as_bytes());
        }
        hasher.finalize()
    }
}

/// Hash a single file in fixed-size chunks.
///
/// Blocking; call from `spawn_blocking` in async contexts.
pub fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHash::hasher();
    let mut buf = vec![0u8; IO_CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hash a payload that is either a regular file or a directory tree.
///
/// Symlinks are followed, so a hub snapshot (links into `blobs/`) hashes the
/// same as a plain copy of the same files.
pub fn hash_payload(path: &Path, cancel: &CancellationToken) -> Result<ContentHash> {
    let meta = std::fs::metadata(path)?;
    if meta.is_file() {
        return hash_file(path, cancel);
    }

    let mut tree = TreeHasher::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(path)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        tree.add(relative_key(rel), hash_file(entry.path(), cancel)?);
    }
    Ok(tree.finalize())
}

/// Render a relative path with `/` separators.
pub fn relative_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
