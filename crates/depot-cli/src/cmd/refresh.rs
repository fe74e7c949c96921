//! Refresh command

use std::sync::Arc;

use anyhow::{Result, bail};
use depot_core::Reporter;

use crate::context::{Context, interrupt_token, scope};
use crate::ui::ConsoleReporter;

/// Re-fetch catalogs, reporting each repository separately.
pub async fn refresh(ctx: &Context, repo: Option<&str>) -> Result<()> {
    let reporter = Arc::new(ConsoleReporter::new(ctx.quiet));
    let engine = ctx.engine(reporter.clone())?;
    let scope = scope(repo)?;

    let results = engine.refresh(&scope, &interrupt_token()).await?;
    let mut failures = 0usize;
    for (key, result) in &results {
        match result {
            Ok(count) => reporter.info(&format!("{key}: {count} entries")),
            Err(e) => {
                failures += 1;
                reporter.warning(&format!("{key}: {e}"));
            }
        }
    }
    if !results.is_empty() && failures == results.len() {
        bail!("Every repository failed to refresh");
    }
    Ok(())
}
