//! Source registry - the known repositories, in declared order.

use std::collections::HashSet;

use depot_schema::{RepoKey, RepositoryDescriptor};

use crate::error::EngineError;
use crate::io::transport::Location;

/// Read-only list of repository descriptors.
///
/// Declared order is significant: it is the last tie-breaker when the
/// resolver cannot otherwise choose between repositories.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    repositories: Vec<RepositoryDescriptor>,
}

impl SourceRegistry {
    /// Build a registry, rejecting duplicate keys and descriptors without a primary location.
    pub fn new(repositories: Vec<RepositoryDescriptor>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for repo in &repositories {
            if !seen.insert(repo.key.clone()) {
                return Err(EngineError::Config(format!(
                    "duplicate repository key '{}'",
                    repo.key
                )));
            }
            if repo.primary.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "repository '{}' has no primary location",
                    repo.key
                )));
            }
        }
        Ok(Self { repositories })
    }

    /// All descriptors in declared order.
    pub fn list(&self) -> &[RepositoryDescriptor] {
        &self.repositories
    }

    /// Look up one descriptor.
    pub fn get(&self, key: &RepoKey) -> Result<&RepositoryDescriptor, EngineError> {
        self.repositories
            .iter()
            .find(|r| &r.key == key)
            .ok_or_else(|| EngineError::NotFound(key.clone()))
    }

    /// Position of a repository in declared order.
    pub fn position(&self, key: &RepoKey) -> Option<usize> {
        self.repositories.iter().position(|r| &r.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Ordered fetch locations for `path` within a repository.
    ///
    /// Only the primary location of a repository that requires auth is
    /// marked authenticated; mirrors never receive the access token.
    pub fn locations(
        &self,
        key: &RepoKey,
        path: &str,
        prefer_mirror: bool,
    ) -> Result<Vec<Location>, EngineError> {
        let repo = self.get(key)?;
        Ok(locations_for(repo, path, prefer_mirror))
    }
}

pub(crate) fn locations_for(
    repo: &RepositoryDescriptor,
    path: &str,
    prefer_mirror: bool,
) -> Vec<Location> {
    repo.bases(prefer_mirror)
        .into_iter()
        .map(|base| {
            Location::new(base, path).authenticated(repo.requires_auth && base == repo.primary)
        })
        .collect()
}
