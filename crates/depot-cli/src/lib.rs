//! depot - resolve, fetch and install game manifest packages
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! # Overview
//!
//! `depot` searches one or many manifest repositories for a game, downloads
//! the winning artifact set through the best available mirror, verifies it
//! and installs a package laid out for the chosen unlock agent.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.depot/
//! ├── config.toml           # repositories, token, network settings
//! └── library/
//!     ├── library.db        # SQLite index
//!     ├── packages/<id>/    # one directory per installed game
//!     └── tmp/              # staging areas
//! ```

pub mod cmd;
pub mod context;
pub mod ui;

use clap::{Args, Parser, Subcommand, ValueEnum};
use depot_schema::TargetAgent;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "depot")]
#[command(author, version, about = "depot - resolve, fetch and install game manifest packages")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Path to config.toml (defaults to $DEPOT_HOME/config.toml)
    #[arg(long, global = true, env = "DEPOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Library root (defaults to $DEPOT_HOME/library)
    #[arg(long, global = true, env = "DEPOT_LIBRARY")]
    pub library: Option<PathBuf>,

    /// Access token for repositories that require authentication
    #[arg(long, global = true, env = "DEPOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Try mirrors before primary locations
    #[arg(long, global = true)]
    pub prefer_mirror: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Unlock agent selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentArg {
    Steamtools,
    Greenluma,
}

impl From<AgentArg> for TargetAgent {
    fn from(arg: AgentArg) -> Self {
        match arg {
            AgentArg::Steamtools => TargetAgent::SteamTools,
            AgentArg::Greenluma => TargetAgent::GreenLuma,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct InstallArgs {
    /// Game names, numeric IDs or store/SteamDB URLs
    #[arg(required = true)]
    pub queries: Vec<String>,
    /// Only look in this repository
    #[arg(long)]
    pub repo: Option<String>,
    /// Agent to lay the package out for (defaults to the configured agent)
    #[arg(long, value_enum)]
    pub agent: Option<AgentArg>,
    /// Bypass the catalog cache
    #[arg(long)]
    pub refresh: bool,
    /// Fail instead of picking by repository order when candidates tie
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve, download and install packages
    Install(InstallArgs),
    /// Search repositories for a game
    Search {
        /// Game name, numeric ID or store/SteamDB URL
        query: String,
        /// Only look in this repository
        #[arg(long)]
        repo: Option<String>,
    },
    /// List installed packages
    List,
    /// Remove installed packages
    Remove {
        /// Game IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show configured repositories
    Repos,
    /// Re-fetch repository catalogs
    Refresh {
        /// Only refresh this repository
        #[arg(long)]
        repo: Option<String>,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_install_flags() {
        let cli = Cli::parse_from([
            "depot", "install", "730", "portal", "--repo", "swa", "--agent", "greenluma", "--strict",
        ]);
        let Commands::Install(args) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(args.queries, vec!["730", "portal"]);
        assert_eq!(args.repo.as_deref(), Some("swa"));
        assert_eq!(args.agent.map(TargetAgent::from), Some(TargetAgent::GreenLuma));
        assert!(args.strict);
        assert!(!args.refresh);
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::parse_from(["depot", "list", "--prefer-mirror", "--library", "/tmp/lib"]);
        assert!(cli.global.prefer_mirror);
        assert_eq!(cli.global.library, Some(PathBuf::from("/tmp/lib")));
    }
}
