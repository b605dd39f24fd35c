//! Core domain types and shared logic for hoard.
//!
//! This crate defines the data model used across all other crates:
//! - Source types and source-qualified artifact identifiers
//! - Content hashes for single files and directory trees
//! - Name normalization used for duplicate candidate matching
//! - Configuration loading

pub mod config;
pub mod error;
pub mod hash;
pub mod identifier;
pub mod naming;

pub use config::HoardConfig;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher, TreeHasher, hash_file, hash_payload};
pub use identifier::{Identifier, SourceType};
pub use naming::normalize_name;

/// Buffer size for streamed hashing and copying: 1 MiB
pub const IO_CHUNK_SIZE: usize = 1024 * 1024;

/// Maximum accepted length of an identifier name.
pub const MAX_NAME_LEN: usize = 256;
