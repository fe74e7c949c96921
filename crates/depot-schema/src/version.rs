//! Version marker ordering.
//!
//! Supports:
//! - Floating: semantic comparison (`v1.10` > `v1.9`, `5` > `3`, stable > pre-release)
//! - Pinned: plain string comparison (ISO dates, zero-padded revisions)
//!
//! Every marker maps to one [`MarkerKey`], so the ordering is total: any
//! version-like marker ranks above free text, and text compares as strings.

use std::cmp::Ordering;

use crate::repository::FreshnessPolicy;
use crate::types::VersionMarker;

/// Sort key for a version marker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MarkerKey {
    /// Dates, revision hashes and anything else without a numeric shape.
    Text(String),
    /// Dotted numeric release, trailing zero components removed.
    Release(Vec<u64>, Stability),
}

/// Pre-releases sort below the release they lead up to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stability {
    /// A semver pre-release tag such as `beta.2`.
    Pre(semver::Prerelease),
    /// A plain release.
    Stable,
}

impl MarkerKey {
    /// Key for a marker compared under `policy`.
    pub fn new(policy: FreshnessPolicy, marker: &VersionMarker) -> Self {
        match policy {
            FreshnessPolicy::Floating => semantic_key(marker.as_str()),
            FreshnessPolicy::Pinned => Self::Text(marker.as_str().to_string()),
        }
    }
}

/// Compare two markers under a freshness policy.
pub fn compare(policy: FreshnessPolicy, a: &VersionMarker, b: &VersionMarker) -> Ordering {
    MarkerKey::new(policy, a).cmp(&MarkerKey::new(policy, b))
}

/// Compare two markers that may come from repositories with different policies.
///
/// Pinned markers are always text. A floating marker with a numeric shape
/// therefore outranks any pinned marker.
pub fn compare_across(
    (a_policy, a): (FreshnessPolicy, &VersionMarker),
    (b_policy, b): (FreshnessPolicy, &VersionMarker),
) -> Ordering {
    MarkerKey::new(a_policy, a).cmp(&MarkerKey::new(b_policy, b))
}

/// Returns true if `incoming` is strictly newer than `installed`.
pub fn is_newer(policy: FreshnessPolicy, installed: &VersionMarker, incoming: &VersionMarker) -> bool {
    compare(policy, incoming, installed) == Ordering::Greater
}

fn strip_prefix(v: &str) -> &str {
    let v = v.trim();
    v.strip_prefix('v')
        .or_else(|| v.strip_prefix('V'))
        .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
        .unwrap_or(v)
}

fn trimmed(mut parts: Vec<u64>) -> Vec<u64> {
    while parts.last() == Some(&0) {
        parts.pop();
    }
    parts
}

fn semantic_key(raw: &str) -> MarkerKey {
    let v = strip_prefix(raw);

    if let Ok(ver) = semver::Version::parse(v) {
        let stability = if ver.pre.is_empty() {
            Stability::Stable
        } else {
            Stability::Pre(ver.pre)
        };
        return MarkerKey::Release(trimmed(vec![ver.major, ver.minor, ver.patch]), stability);
    }

    let numeric: Option<Vec<u64>> = v.split('.').map(|s| s.parse::<u64>().ok()).collect();
    match numeric {
        Some(parts) => MarkerKey::Release(trimmed(parts), Stability::Stable),
        None => MarkerKey::Text(raw.trim().to_string()),
    }
}
