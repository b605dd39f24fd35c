//! Usage repository.

use crate::error::RegistryResult;
use crate::models::UsageRow;
use async_trait::async_trait;
use std::collections::HashMap;

/// Repository for artifact usage by applications.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// Link an artifact to an application. Idempotent; bumps `last_used_at`.
    async fn link_usage(&self, identifier: &str, app_name: &str) -> RegistryResult<UsageRow>;

    /// Names of applications using an artifact, sorted.
    async fn apps_using(&self, identifier: &str) -> RegistryResult<Vec<String>>;

    /// Identifier -> sorted application names, for every artifact with usage.
    async fn usage_map(&self) -> RegistryResult<HashMap<String, Vec<String>>>;
}
