//! Search command

use std::sync::Arc;

use anyhow::Result;
use depot_core::Reporter;
use depot_core::resolver::MatchScore;

use crate::context::{Context, interrupt_token, scope};
use crate::ui::ConsoleReporter;
use crate::ui::list::{print_footer, print_search_header, print_search_row};

fn score_label(score: MatchScore) -> &'static str {
    match score {
        MatchScore::Id => "id",
        MatchScore::Exact => "exact",
        MatchScore::Prefix => "prefix",
        MatchScore::Substring => "substring",
    }
}

/// Search every repository in scope and print the ranked candidates.
pub async fn search(ctx: &Context, query: &str, repo: Option<&str>) -> Result<()> {
    let reporter = Arc::new(ConsoleReporter::new(ctx.quiet));
    let engine = ctx.engine(reporter.clone())?;
    let scope = scope(repo)?;
    let results = engine
        .search(query, &scope, false, &interrupt_token())
        .await?;

    for w in &results.warnings {
        reporter.warning(w);
    }
    if results.candidates.is_empty() {
        println!("No matches for '{query}'");
        return Ok(());
    }

    print_search_header();
    for c in &results.candidates {
        let id = c.entry.game_id.map(|id| id.to_string()).unwrap_or_default();
        print_search_row(
            &id,
            &c.entry.name,
            c.entry.version.as_str(),
            c.repository().as_str(),
            score_label(c.score),
        );
    }
    let n = results.candidates.len();
    print_footer(&format!("{n} {}", if n == 1 { "match" } else { "matches" }));
    Ok(())
}
