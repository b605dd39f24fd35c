//! Repository traits for registry operations.

pub mod applications;
pub mod artifacts;
pub mod usage;

pub use applications::ApplicationRepo;
pub use artifacts::ArtifactRepo;
pub use usage::UsageRepo;
