//! Repos command

use anyhow::Result;
use depot_schema::{FreshnessPolicy, TrustLevel};

use crate::context::Context;
use crate::ui::list::{print_footer, print_repos_header, print_repos_row};

/// Show configured repositories in declared order
pub fn repos(ctx: &Context) -> Result<()> {
    if ctx.config.repositories.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    print_repos_header();
    for repo in &ctx.config.repositories {
        let policy = match repo.policy {
            FreshnessPolicy::Floating => "floating",
            FreshnessPolicy::Pinned => "pinned",
        };
        let trust = match repo.trust {
            TrustLevel::Low => "low",
            TrustLevel::Normal => "normal",
            TrustLevel::High => "high",
        };
        print_repos_row(repo.key.as_str(), repo.name(), policy, trust, repo.mirrors.len());
    }
    print_footer(&format!(
        "{} configured{}",
        ctx.config.repositories.len(),
        if ctx.config.prefer_mirror {
            ", mirrors preferred"
        } else {
            ""
        }
    ));
    Ok(())
}
