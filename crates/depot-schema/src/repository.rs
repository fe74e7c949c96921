//! Repository descriptors.
//!
//! A descriptor is everything the engine knows about one remote source
//! before talking to it: where it lives, how its listing is shaped, how its
//! version markers compare and how much it is trusted relative to others.

use serde::{Deserialize, Serialize};

use crate::types::RepoKey;

/// Default listing path relative to a repository base location.
pub const DEFAULT_CATALOG_PATH: &str = "index.json";

/// How a repository's version markers evolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessPolicy {
    /// Markers are ordered versions and the agent should always track the
    /// latest manifest. Compared semantically (`v1.10` > `v1.9`).
    #[default]
    Floating,
    /// Markers identify one exact artifact set that the agent must stay on.
    /// Compared as plain strings (dates, zero-padded revisions).
    Pinned,
}

/// Relative trust in a repository's content.
///
/// Ordered: `Low < Normal < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Community or unverified source.
    Low,
    /// Default trust.
    #[default]
    Normal,
    /// Curated source preferred on equal match quality.
    High,
}

/// Top-level shape of a repository's listing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogFormat {
    /// A JSON array of entries, or an object with an `entries` array.
    #[default]
    Flat,
    /// A JSON object keyed by game ID, each value an entry without `id`.
    Keyed,
}

/// Immutable description of one remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    /// Stable identity.
    pub key: RepoKey,
    /// Human readable name; defaults to the key.
    #[serde(default)]
    pub display_name: String,
    /// Primary base location.
    pub primary: String,
    /// Mirror base locations, tried in declared order.
    #[serde(default)]
    pub mirrors: Vec<String>,
    /// Listing path relative to each base location.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    /// Listing shape.
    #[serde(default)]
    pub format: CatalogFormat,
    /// Version marker ordering rule.
    #[serde(default)]
    pub policy: FreshnessPolicy,
    /// Trust level used when ranking across repositories.
    #[serde(default)]
    pub trust: TrustLevel,
    /// Whether requests should carry the configured access token.
    #[serde(default)]
    pub requires_auth: bool,
}

fn default_catalog_path() -> String {
    DEFAULT_CATALOG_PATH.to_string()
}

impl RepositoryDescriptor {
    /// Create a descriptor with default policy, trust and listing shape.
    pub fn new(key: RepoKey, primary: impl Into<String>) -> Self {
        Self {
            display_name: key.to_string(),
            key,
            primary: primary.into(),
            mirrors: Vec::new(),
            catalog_path: default_catalog_path(),
            format: CatalogFormat::default(),
            policy: FreshnessPolicy::default(),
            trust: TrustLevel::default(),
            requires_auth: false,
        }
    }

    /// Add a mirror base location.
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirrors.push(mirror.into());
        self
    }

    /// Set the freshness policy.
    pub fn with_policy(mut self, policy: FreshnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the trust level.
    pub fn with_trust(mut self, trust: TrustLevel) -> Self {
        self.trust = trust;
        self
    }

    /// Set the listing shape.
    pub fn with_format(mut self, format: CatalogFormat) -> Self {
        self.format = format;
        self
    }

    /// Name to show to users.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            self.key.as_str()
        } else {
            &self.display_name
        }
    }

    /// Base locations in attempt order.
    ///
    /// Primary first, then mirrors in declared order. When `prefer_mirror`
    /// is set the mirrors come first and the primary is the last fallback.
    pub fn bases(&self, prefer_mirror: bool) -> Vec<&str> {
        let mirrors = self.mirrors.iter().map(String::as_str);
        if prefer_mirror && !self.mirrors.is_empty() {
            mirrors.chain(std::iter::once(self.primary.as_str())).collect()
        } else {
            std::iter::once(self.primary.as_str()).chain(mirrors).collect()
        }
    }
}
