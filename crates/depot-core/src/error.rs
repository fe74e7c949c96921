//! Domain-specific errors for engine operations

use std::time::Duration;

use depot_schema::{GameId, RepoKey};
use thiserror::Error;

use crate::io::transport::TransportError;
use crate::library::db::DbError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown repository: {0}")]
    NotFound(RepoKey),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No entry matching '{query}' in {scope}")]
    NoMatch { query: String, scope: String },

    #[error("'{query}' is ambiguous: {}", .candidates.join(", "))]
    Ambiguous {
        query: String,
        candidates: Vec<String>,
    },

    #[error("All sources unavailable for {repository} ({attempts} locations tried)")]
    AllSourcesUnavailable { repository: RepoKey, attempts: usize },

    #[error("Rate limited by {repository}{}", .retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited {
        repository: RepoKey,
        retry_after: Option<Duration>,
    },

    #[error("Integrity mismatch for {file} from {repository}: {detail}")]
    IntegrityMismatch {
        repository: RepoKey,
        file: String,
        detail: String,
    },

    #[error("Failed to acquire {file} from {repository}: {source}")]
    AcquisitionFailed {
        repository: RepoKey,
        file: String,
        #[source]
        source: TransportError,
    },

    #[error("Unsupported manifest shape{}: {reason}", .game_id.map(|id| format!(" for {id}")).unwrap_or_default())]
    UnsupportedManifestShape {
        game_id: Option<GameId>,
        reason: String,
    },

    #[error("Placement of {game_id} rejected: {reason}")]
    Rejected { game_id: GameId, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Library index error: {0}")]
    Library(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Map a transport failure while talking to `repository`.
    pub fn from_transport(repository: &RepoKey, err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            TransportError::RateLimited { retry_after, .. } => Self::RateLimited {
                repository: repository.clone(),
                retry_after,
            },
            TransportError::AllSourcesUnavailable { failures } => Self::AllSourcesUnavailable {
                repository: repository.clone(),
                attempts: failures.len(),
            },
            TransportError::NoLocations => Self::AllSourcesUnavailable {
                repository: repository.clone(),
                attempts: 0,
            },
        }
    }
}
