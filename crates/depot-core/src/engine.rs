//! Engine facade - query to installed package in one call.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use depot_schema::{GameId, RepoKey, TargetAgent, VersionMarker};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::acquire::Acquirer;
use crate::assemble::assemble;
use crate::catalog::CatalogIndex;
use crate::config::Config;
use crate::error::EngineError;
use crate::io::transport::{Fetch, HttpTransport};
use crate::library::{LibraryReconciler, ReconcileOutcome};
use crate::paths::tmp_path;
use crate::registry::SourceRegistry;
use crate::reporter::Reporter;
use crate::resolver::{Query, ResolveMode, Resolver, Scope, SearchResults};

/// One install request.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub query: String,
    pub scope: Scope,
    pub agent: TargetAgent,
    pub mode: ResolveMode,
}

/// What an install did.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub game_id: GameId,
    pub name: String,
    pub repository: RepoKey,
    pub version: VersionMarker,
    pub outcome: ReconcileOutcome,
    /// Files in the assembled package.
    pub files: usize,
    pub warnings: Vec<String>,
}

/// Wires registry, catalog, resolver, acquirer, assembler and library together.
pub struct Engine {
    registry: Arc<SourceRegistry>,
    catalog: Arc<CatalogIndex>,
    resolver: Resolver,
    acquirer: Acquirer,
    library: LibraryReconciler,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("library", &self.library)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine that talks HTTP.
    pub fn new(
        config: &Config,
        library_root: &Path,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, EngineError> {
        let transport = HttpTransport::new(config.transport());
        Self::with_fetcher(config, library_root, Arc::new(transport), reporter)
    }

    /// Build an engine over any [`Fetch`] implementation.
    pub fn with_fetcher(
        config: &Config,
        library_root: &Path,
        fetcher: Arc<dyn Fetch>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, EngineError> {
        let registry = Arc::new(config.registry()?);
        let catalog = Arc::new(
            CatalogIndex::new(Arc::clone(&registry), Arc::clone(&fetcher))
                .with_ttl(config.ttl())
                .with_mirror_preference(config.prefer_mirror),
        );
        let resolver = Resolver::new(Arc::clone(&catalog))
            .with_concurrency(config.catalog.search_concurrency);
        let acquirer = Acquirer::new(Arc::clone(&registry), fetcher, tmp_path(library_root))
            .with_concurrency(config.network.download_concurrency)
            .with_mirror_preference(config.prefer_mirror);
        let library = LibraryReconciler::open(library_root)?;

        Ok(Self {
            registry,
            catalog,
            resolver,
            acquirer,
            library,
            reporter,
        })
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn library(&self) -> &LibraryReconciler {
        &self.library
    }

    /// Every candidate for a raw query, best first.
    pub async fn search(
        &self,
        raw_query: &str,
        scope: &Scope,
        refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<SearchResults, EngineError> {
        let query = Query::parse(raw_query)?;
        self.resolver.search(&query, scope, refresh, cancel).await
    }

    /// Re-fetch catalogs in scope, returning per-repository entry counts.
    pub async fn refresh(
        &self,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> Result<Vec<(RepoKey, Result<usize, EngineError>)>, EngineError> {
        let keys: Vec<RepoKey> = match scope {
            Scope::Repository(key) => vec![self.registry.get(key)?.key.clone()],
            Scope::All => self.registry.list().iter().map(|r| r.key.clone()).collect(),
        };
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let result = self.catalog.refresh(&key, cancel).await.map(|e| e.len());
            results.push((key, result));
        }
        Ok(results)
    }

    /// Resolve, download, assemble and reconcile one query.
    pub async fn install(
        &self,
        request: &InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<InstallReport, EngineError> {
        let started = Instant::now();
        let query = Query::parse(&request.query)?;

        self.reporter.section("Resolving");
        let resolution = self
            .resolver
            .resolve(&query, &request.scope, request.mode, cancel)
            .await?;
        for w in &resolution.warnings {
            self.reporter.warning(w);
        }
        let winner = &resolution.winner;
        let entry = &winner.entry;
        self.reporter.resolved(
            &request.query,
            &entry.name,
            &entry.repository,
            entry.version.as_str(),
        );

        let game_id = match (entry.game_id, &query) {
            (Some(id), _) => id,
            (None, Query::Id(id)) => *id,
            (None, Query::Name(_)) => {
                return Err(EngineError::UnsupportedManifestShape {
                    game_id: None,
                    reason: format!("entry '{}' has no game id", entry.name),
                });
            }
        };

        self.reporter.section("Downloading");
        let staged = self.acquirer.acquire(winner, cancel).await?;
        for file in &staged.files {
            self.reporter
                .downloading(game_id, &file.remote, file.size, file.size);
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let package = assemble(&staged, request.agent, game_id, winner.policy)?;
        let outcome = self
            .library
            .reconcile(
                game_id,
                &package,
                &entry.repository,
                &entry.version,
                winner.policy,
            )
            .await?;

        if let ReconcileOutcome::Rejected { reason } = &outcome {
            self.reporter.failed(Some(game_id), reason);
            return Err(EngineError::Rejected {
                game_id,
                reason: reason.clone(),
            });
        }

        let detail = match &outcome {
            ReconcileOutcome::Installed => format!("installed {}", entry.version),
            ReconcileOutcome::Upgraded { previous } => {
                format!("upgraded {previous} -> {}", entry.version)
            }
            ReconcileOutcome::Skipped { installed } => format!("already at {installed}"),
            ReconcileOutcome::Rejected { .. } => String::new(),
        };
        self.reporter.done(game_id, &detail);
        info!(
            game_id = %game_id,
            repo = %entry.repository,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{detail}"
        );

        Ok(InstallReport {
            game_id,
            name: entry.name.clone(),
            repository: entry.repository.clone(),
            version: entry.version.clone(),
            outcome,
            files: package.files.len(),
            warnings: resolution.warnings.clone(),
        })
    }
}
