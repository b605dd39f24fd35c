//! Cache manager and deduplication engine for hoard.
//!
//! [`CacheManager`] is constructed explicitly from a configuration, a
//! registry, and a set of source adapters; nothing is read from ambient
//! global state, so every test runs against its own temporary root.

pub mod dedup;
pub mod error;
mod files;
pub mod manager;
pub mod report;

pub use dedup::{DedupMember, DedupPlan, DuplicateGroup, LinkAction, RejectedCandidate};
pub use error::{CacheError, CacheResult, ErrorClass};
pub use manager::CacheManager;
pub use report::{
    ApplyReport, ArtifactView, CacheStats, CleanReport, LinkReport, RemoveReport, StatusEntry,
    SyncReport,
};
