//! Resolver - picks the catalog entry that best answers a query.
//!
//! Ranking is deterministic: match score, then repository trust, then version
//! freshness, then retrieval time, then declared position.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use depot_schema::version::compare_across;
use depot_schema::{
    CatalogEntry, FreshnessPolicy, GameId, RepoKey, RepositoryDescriptor, TrustLevel,
};
use futures::stream::{self, StreamExt};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::catalog::CatalogIndex;
use crate::error::EngineError;

/// Default number of repositories queried at once for scope `All`.
pub const DEFAULT_SEARCH_CONCURRENCY: usize = 4;

static APP_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:store\.steampowered\.com|steamdb\.info)/app/(\d+)").ok()
});

/// A parsed user query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Id(GameId),
    Name(String),
}

impl Query {
    /// Parse raw user input: numeric IDs, store/SteamDB app URLs, or a name.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EngineError::InvalidQuery("empty query".into()));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return raw
                .parse()
                .map(Query::Id)
                .map_err(|_| EngineError::InvalidQuery(format!("game id out of range: {raw}")));
        }
        if let Some(caps) = APP_URL.as_ref().and_then(|re| re.captures(raw))
            && let Some(id) = caps.get(1).and_then(|m| m.as_str().parse().ok())
        {
            return Ok(Query::Id(id));
        }
        Ok(Query::Name(raw.to_string()))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Id(id) => write!(f, "{id}"),
            Query::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Which repositories a resolution looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Repository(RepoKey),
    All,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Repository(key) => write!(f, "repository {key}"),
            Scope::All => write!(f, "all repositories"),
        }
    }
}

/// How well an entry matches a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchScore {
    Substring = 1,
    Prefix = 2,
    Exact = 3,
    Id = 4,
}

/// What to do when the ranking rules cannot separate two candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Pick by declared registry (or catalog) order.
    #[default]
    DeclaredOrder,
    /// Fail with `Ambiguous`.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolveMode {
    /// Bypass the catalog cache.
    pub refresh: bool,
    pub on_tie: TieBreak,
}

/// A catalog entry scored against a query.
#[derive(Debug, Clone)]
pub struct ResolvedCandidate {
    pub entry: CatalogEntry,
    pub score: MatchScore,
    pub query: Query,
    pub trust: TrustLevel,
    pub policy: FreshnessPolicy,
    /// Position of the owning repository in the registry.
    pub declared_index: usize,
    /// Position of the entry in its repository's catalog.
    pub position: usize,
}

impl ResolvedCandidate {
    pub fn repository(&self) -> &RepoKey {
        &self.entry.repository
    }

    /// "name (repo, version)" label used in ambiguity reports.
    pub fn label(&self) -> String {
        format!(
            "{} ({}, {})",
            self.entry.name, self.entry.repository, self.entry.version
        )
    }

    fn retrieved_at(&self) -> DateTime<Utc> {
        self.entry.retrieved_at
    }
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub winner: ResolvedCandidate,
    /// Candidates indistinguishable from the winner except by position.
    pub tied: Vec<ResolvedCandidate>,
    /// Per-repository problems absorbed during an `All` resolution.
    pub warnings: Vec<String>,
}

/// Every candidate for a query, best first.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub candidates: Vec<ResolvedCandidate>,
    pub warnings: Vec<String>,
}

/// Score an entry's display name against a lowercase needle.
fn name_score(needle: &str, name: &str) -> Option<MatchScore> {
    let name = name.to_lowercase();
    if name == needle {
        Some(MatchScore::Exact)
    } else if name.starts_with(needle) {
        Some(MatchScore::Prefix)
    } else if name.contains(needle) {
        Some(MatchScore::Substring)
    } else {
        None
    }
}

/// Score every entry of one repository's catalog, best first.
///
/// For an ID query, name matching is only used when no entry carries the ID.
pub fn rank_repository(
    repo: &RepositoryDescriptor,
    declared_index: usize,
    entries: &[CatalogEntry],
    query: &Query,
) -> Vec<ResolvedCandidate> {
    let candidate = |position: usize, entry: &CatalogEntry, score| ResolvedCandidate {
        entry: entry.clone(),
        score,
        query: query.clone(),
        trust: repo.trust,
        policy: repo.policy,
        declared_index,
        position,
    };

    let valid = entries.iter().enumerate().filter(|(_, e)| e.is_valid());
    let mut ranked: Vec<ResolvedCandidate> = match query {
        Query::Id(id) => {
            let by_id: Vec<_> = valid
                .clone()
                .filter(|(_, e)| e.game_id == Some(*id))
                .map(|(i, e)| candidate(i, e, MatchScore::Id))
                .collect();
            if by_id.is_empty() {
                let needle = id.to_string();
                valid
                    .filter_map(|(i, e)| name_score(&needle, &e.name).map(|s| candidate(i, e, s)))
                    .collect()
            } else {
                by_id
            }
        }
        Query::Name(name) => {
            let needle = name.to_lowercase();
            valid
                .filter_map(|(i, e)| name_score(&needle, &e.name).map(|s| candidate(i, e, s)))
                .collect()
        }
    };
    ranked.sort_by(rank);
    ranked
}

/// Everything but position: score, trust, freshness, retrieval time.
fn rank_by_merit(a: &ResolvedCandidate, b: &ResolvedCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.trust.cmp(&a.trust))
        .then_with(|| {
            compare_across(
                (b.policy, &b.entry.version),
                (a.policy, &a.entry.version),
            )
        })
        .then_with(|| b.retrieved_at().cmp(&a.retrieved_at()))
}

/// Total order: best candidate first.
fn rank(a: &ResolvedCandidate, b: &ResolvedCandidate) -> Ordering {
    rank_by_merit(a, b)
        .then_with(|| a.declared_index.cmp(&b.declared_index))
        .then_with(|| a.position.cmp(&b.position))
}

/// A repository's best candidate plus everything tied with it on merit.
fn best_of(ranked: Vec<ResolvedCandidate>) -> Vec<ResolvedCandidate> {
    let Some(best) = ranked.first().cloned() else {
        return ranked;
    };
    ranked
        .into_iter()
        .take_while(|c| rank_by_merit(&best, c) == Ordering::Equal)
        .collect()
}

/// Pick the winner out of ranked candidates.
fn settle(
    query: &Query,
    scope: &Scope,
    mut ranked: Vec<ResolvedCandidate>,
    warnings: Vec<String>,
    on_tie: TieBreak,
) -> Result<Resolution, EngineError> {
    if ranked.is_empty() {
        return Err(EngineError::NoMatch {
            query: query.to_string(),
            scope: scope.to_string(),
        });
    }
    let winner = ranked.remove(0);
    let tied: Vec<_> = ranked
        .into_iter()
        .take_while(|c| rank_by_merit(&winner, c) == Ordering::Equal)
        .collect();

    if on_tie == TieBreak::Fail && !tied.is_empty() {
        let candidates = std::iter::once(&winner)
            .chain(tied.iter())
            .map(ResolvedCandidate::label)
            .collect();
        return Err(EngineError::Ambiguous {
            query: query.to_string(),
            candidates,
        });
    }

    debug!(
        query = %query,
        repo = %winner.repository(),
        name = %winner.entry.name,
        score = ?winner.score,
        tied = tied.len(),
        "resolved"
    );
    Ok(Resolution {
        winner,
        tied,
        warnings,
    })
}

/// Resolves queries against the catalog index.
#[derive(Debug)]
pub struct Resolver {
    catalog: Arc<CatalogIndex>,
    concurrency: usize,
}

impl Resolver {
    pub fn new(catalog: Arc<CatalogIndex>) -> Self {
        Self {
            catalog,
            concurrency: DEFAULT_SEARCH_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve a query to a single winning candidate.
    pub async fn resolve(
        &self,
        query: &Query,
        scope: &Scope,
        mode: ResolveMode,
        cancel: &CancellationToken,
    ) -> Result<Resolution, EngineError> {
        let found = self.collect(query, scope, mode.refresh, true, cancel).await?;
        settle(query, scope, found.candidates, found.warnings, mode.on_tie)
    }

    /// Every candidate in scope, best first.
    pub async fn search(
        &self,
        query: &Query,
        scope: &Scope,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<SearchResults, EngineError> {
        self.collect(query, scope, refresh, false, cancel).await
    }

    async fn candidates(
        &self,
        repo: &RepositoryDescriptor,
        declared_index: usize,
        query: &Query,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedCandidate>, EngineError> {
        let entries = if refresh {
            self.catalog.refresh(&repo.key, cancel).await?
        } else {
            self.catalog.list(&repo.key, cancel).await?
        };
        Ok(rank_repository(repo, declared_index, &entries, query))
    }

    /// Gather ranked candidates; with `best_only`, keep each repository's top tier.
    async fn collect(
        &self,
        query: &Query,
        scope: &Scope,
        refresh: bool,
        best_only: bool,
        cancel: &CancellationToken,
    ) -> Result<SearchResults, EngineError> {
        let registry = self.catalog.registry();
        let key = match scope {
            Scope::Repository(key) => key,
            Scope::All => return self.collect_all(query, refresh, best_only, cancel).await,
        };

        let repo = registry.get(key)?;
        let index = registry.position(key).unwrap_or_default();
        let candidates = self.candidates(repo, index, query, refresh, cancel).await?;
        let warnings = self
            .catalog
            .warnings(key)
            .into_iter()
            .map(|w| format!("{key}: {w}"))
            .collect();
        Ok(SearchResults {
            candidates,
            warnings,
        })
    }

    /// Query every repository with bounded concurrency; failures become warnings.
    async fn collect_all(
        &self,
        query: &Query,
        refresh: bool,
        best_only: bool,
        cancel: &CancellationToken,
    ) -> Result<SearchResults, EngineError> {
        let registry = self.catalog.registry();
        let outcomes: Vec<_> = stream::iter(registry.list().iter().enumerate())
            .map(|(index, repo)| async move {
                let result = self.candidates(repo, index, query, refresh, cancel).await;
                (repo, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut results = SearchResults::default();
        let mut first_error = None;
        let mut succeeded = 0usize;
        for (repo, outcome) in outcomes {
            match outcome {
                Ok(mut ranked) => {
                    succeeded += 1;
                    results.warnings.extend(
                        self.catalog
                            .warnings(&repo.key)
                            .into_iter()
                            .map(|w| format!("{}: {w}", repo.key)),
                    );
                    if best_only {
                        ranked = best_of(ranked);
                    }
                    results.candidates.extend(ranked);
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    warn!(repo = %repo.key, "catalog lookup failed: {e}");
                    results.warnings.push(format!("{}: {e}", repo.key));
                    first_error.get_or_insert(e);
                }
            }
        }

        if succeeded == 0
            && let Some(e) = first_error
        {
            return Err(e);
        }
        results.candidates.sort_by(rank);
        Ok(results)
    }
}
