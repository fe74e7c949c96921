//! depot CLI entry point

use anyhow::Result;
use clap::Parser;
use depot_cli::context::Context;
use depot_cli::{Cli, Commands, cmd};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        cmd::completions(*shell);
        return Ok(());
    }

    let ctx = Context::load(&cli.global)?;
    match &cli.command {
        Commands::Install(args) => cmd::install(&ctx, args).await,
        Commands::Search { query, repo } => cmd::search(&ctx, query, repo.as_deref()).await,
        Commands::List => cmd::list(&ctx),
        Commands::Remove { ids } => cmd::remove(&ctx, ids).await,
        Commands::Repos => cmd::repos(&ctx),
        Commands::Refresh { repo } => cmd::refresh(&ctx, repo.as_deref()).await,
        Commands::Completions { .. } => Ok(()),
    }
}
