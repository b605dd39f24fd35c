//! Registry for hoard.
//!
//! This crate provides the durable data model:
//! - Artifacts: tracked model payloads keyed by source-qualified identifier
//! - Applications: consumers registered against the cache
//! - Usage: which application depends on which artifact
//!
//! Writes are serialized by an exclusive advisory lock so concurrent
//! invocations block instead of interleaving.

pub mod error;
pub mod lock;
mod migrations;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use models::{ApplicationRow, ArtifactRow, NewArtifact, UpsertOutcome};
pub use repos::{ApplicationRepo, ArtifactRepo, UsageRepo};
pub use store::{Registry, SqliteRegistry};

use hoard_core::HoardConfig;
use std::sync::Arc;

/// Open the registry configured for this cache root.
pub async fn open(config: &HoardConfig) -> RegistryResult<Arc<dyn Registry>> {
    let store = SqliteRegistry::new(config.registry_path()).await?;
    Ok(Arc::new(store) as Arc<dyn Registry>)
}
