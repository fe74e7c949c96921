//! Command context: resolved paths, loaded config and engine construction.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use depot_core::library::LibraryReconciler;
use depot_core::resolver::Scope;
use depot_core::{Config, Engine, Reporter, config_path, default_library, try_depot_home};
use depot_schema::RepoKey;
use tokio_util::sync::CancellationToken;

use crate::GlobalArgs;

/// Everything a command needs before it touches the network.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub library: PathBuf,
    pub quiet: bool,
}

impl Context {
    /// Load config and apply command-line overrides.
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let home = || {
            try_depot_home().context("Could not determine home directory. Set DEPOT_HOME to override.")
        };

        let path = match &args.config {
            Some(p) => p.clone(),
            None => config_path(&home()?),
        };
        let mut config = Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        if let Some(token) = &args.token {
            config.access_token = Some(token.clone());
        }
        if args.prefer_mirror {
            config.prefer_mirror = true;
        }

        let library = match &args.library {
            Some(p) => p.clone(),
            None => default_library(&home()?),
        };

        Ok(Self {
            config,
            library,
            quiet: args.quiet,
        })
    }

    pub fn engine(&self, reporter: Arc<dyn Reporter>) -> Result<Engine> {
        Engine::new(&self.config, &self.library, reporter).context("Failed to initialise engine")
    }

    pub fn open_library(&self) -> Result<LibraryReconciler> {
        LibraryReconciler::open(&self.library).with_context(|| {
            format!("Failed to open library at {}", self.library.display())
        })
    }
}

/// Scope from an optional `--repo` flag.
pub fn scope(repo: Option<&str>) -> Result<Scope> {
    match repo {
        Some(key) => Ok(Scope::Repository(
            RepoKey::new(key).with_context(|| format!("Invalid repository key '{key}'"))?,
        )),
        None => Ok(Scope::All),
    }
}

/// A cancellation token that fires on Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
