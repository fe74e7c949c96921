//! Shared types for depot.
//!
//! Everything in this crate is plain data: identifiers, repository
//! descriptors, normalized catalog entries and the version ordering rules
//! used to compare them. Network and filesystem code lives in `depot-core`.

pub mod catalog;
pub mod hash;
pub mod repository;
pub mod types;
pub mod version;

// Re-exports
pub use catalog::{CatalogEntry, RemoteFile};
pub use hash::Sha256Digest;
pub use repository::{CatalogFormat, FreshnessPolicy, RepositoryDescriptor, TrustLevel};
pub use types::*;
