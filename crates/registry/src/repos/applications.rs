//! Application repository.

use crate::error::RegistryResult;
use crate::models::ApplicationRow;
use async_trait::async_trait;
use std::path::Path;

/// Repository for registered applications.
#[async_trait]
pub trait ApplicationRepo: Send + Sync {
    /// Register an application by unique name.
    ///
    /// Re-registering the same name with the same root is a no-op; a different
    /// root is rejected with `AlreadyExists`.
    async fn register_app(&self, name: &str, root_path: &Path) -> RegistryResult<ApplicationRow>;

    /// Unregister an application. Returns the number of usage rows released.
    async fn unregister_app(&self, name: &str) -> RegistryResult<u64>;

    /// Get an application by name.
    async fn get_app(&self, name: &str) -> RegistryResult<Option<ApplicationRow>>;

    /// List all applications.
    async fn list_apps(&self) -> RegistryResult<Vec<ApplicationRow>>;
}
