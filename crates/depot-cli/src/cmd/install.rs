//! Install command

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, bail};
use depot_core::resolver::{ResolveMode, TieBreak};
use depot_core::{InstallRequest, Reporter};
use depot_schema::TargetAgent;

use crate::InstallArgs;
use crate::context::{Context, interrupt_token, scope};
use crate::ui::ConsoleReporter;

/// Install one or more games, continuing past individual failures.
pub async fn install(ctx: &Context, args: &InstallArgs) -> Result<()> {
    let reporter = Arc::new(ConsoleReporter::new(ctx.quiet));
    let engine = ctx.engine(reporter.clone())?;
    let scope = scope(args.repo.as_deref())?;
    let agent = args.agent.map_or(ctx.config.agent, TargetAgent::from);
    let mode = ResolveMode {
        refresh: args.refresh,
        on_tie: if args.strict {
            TieBreak::Fail
        } else {
            TieBreak::DeclaredOrder
        },
    };
    let cancel = interrupt_token();
    let started = Instant::now();

    let mut seen = std::collections::HashSet::new();
    let queries: Vec<&String> = args
        .queries
        .iter()
        .filter(|q| seen.insert(q.trim().to_lowercase()))
        .collect();

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for query in queries {
        if cancel.is_cancelled() {
            reporter.error("Interrupted");
            break;
        }
        let request = InstallRequest {
            query: query.clone(),
            scope: scope.clone(),
            agent,
            mode,
        };
        match engine.install(&request, &cancel).await {
            Ok(_) => succeeded += 1,
            Err(e) => {
                failed += 1;
                tracing::debug!(query = %query, error = ?e, "install failed");
                reporter.failed(None, &format!("{query}: {e}"));
            }
        }
    }

    if succeeded == 0 {
        bail!("No packages were installed");
    }
    reporter.summary(succeeded, "processed", started.elapsed().as_secs_f64());
    if failed > 0 {
        reporter.warning(&format!("{failed} of {} queries failed", succeeded + failed));
    }
    Ok(())
}
