//! Normalized catalog entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::hash::Sha256Digest;
use crate::types::{GameId, RepoKey, VersionMarker};

/// One remote file belonging to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Path relative to the repository base location.
    pub path: String,
    /// Expected size in bytes.
    pub size: u64,
    /// Expected content digest, when the repository publishes one.
    pub sha256: Option<Sha256Digest>,
}

impl RemoteFile {
    /// Final path component, used as the staged file name.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Returns true if the path is relative and never escapes its base.
    pub fn has_safe_path(&self) -> bool {
        is_safe_relative_path(&self.path)
    }
}

/// Returns true if `path` is non-empty, relative, and has no `..` components.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\\') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// A normalized listing entry from one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Repository this entry was listed by.
    pub repository: RepoKey,
    /// Display name of the game.
    pub name: String,
    /// Numeric game ID, if the repository publishes one.
    pub game_id: Option<GameId>,
    /// Files making up the artifact set, in listing order. Never empty.
    pub files: Vec<RemoteFile>,
    /// Version marker of the artifact set.
    pub version: VersionMarker,
    /// When the listing containing this entry was fetched.
    pub retrieved_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Returns true if the entry satisfies the catalog invariants:
    /// a non-blank name, at least one file, and only safe relative paths.
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.files.is_empty()
            && self.files.iter().all(RemoteFile::has_safe_path)
    }
}
