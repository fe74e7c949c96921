//! Identifier newtypes shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric game (application) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(u32);

impl GameId {
    /// Wrap a raw numeric identifier.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Return the raw numeric identifier.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for GameId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for GameId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self)
    }
}

/// Error returned when a repository key fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid repository key '{0}': expected a non-empty key without whitespace")]
pub struct InvalidRepoKey(pub String);

/// Stable identity of a repository in the source registry.
///
/// Keys are case-sensitive and may contain `/` (e.g. `owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoKey(String);

impl RepoKey {
    /// Create a validated `RepoKey`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRepoKey`] if `s` is empty or contains whitespace.
    pub fn new(s: impl Into<String>) -> Result<Self, InvalidRepoKey> {
        let s = s.into();
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(InvalidRepoKey(s));
        }
        Ok(Self(s))
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoKey {
    type Error = InvalidRepoKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RepoKey> for String {
    fn from(key: RepoKey) -> Self {
        key.0
    }
}

impl FromStr for RepoKey {
    type Err = InvalidRepoKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Opaque version marker attached to a catalog entry (tag, date or revision).
///
/// Ordering between markers depends on the owning repository's
/// [`FreshnessPolicy`](crate::FreshnessPolicy); see [`crate::version`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionMarker(String);

impl VersionMarker {
    /// Wrap a raw marker string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the marker as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionMarker {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for VersionMarker {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The unlock agent a package is assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetAgent {
    /// Agent that consumes one generated Lua loader script per game.
    #[default]
    #[serde(alias = "steamtools-style")]
    SteamTools,
    /// Agent that consumes a numbered `AppList` directory plus depot keys.
    #[serde(alias = "greenluma-style")]
    GreenLuma,
}

impl fmt::Display for TargetAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SteamTools => f.write_str("steamtools"),
            Self::GreenLuma => f.write_str("greenluma"),
        }
    }
}
