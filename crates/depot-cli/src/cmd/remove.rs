//! Remove command

use anyhow::{Context as _, Result, bail};
use crossterm::style::Stylize;
use depot_core::EngineError;
use depot_core::library::db::DbError;
use depot_schema::GameId;

use crate::context::Context;
use crate::ui::Theme;

/// Remove one or more installed packages
pub async fn remove(ctx: &Context, ids: &[String]) -> Result<()> {
    let library = ctx.open_library()?;
    let theme = Theme::default();

    let mut missing = Vec::new();
    for raw in ids {
        let game_id: GameId = raw
            .trim()
            .parse()
            .with_context(|| format!("'{raw}' is not a game id"))?;
        match library.remove(game_id).await {
            Ok(files) => {
                if !ctx.quiet {
                    println!(
                        "{} {} removed ({} files)",
                        theme.icons.success.with(theme.colors.success),
                        game_id,
                        files.len()
                    );
                }
            }
            Err(EngineError::Library(DbError::EntryNotFound(_))) => {
                missing.push(game_id.to_string());
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !missing.is_empty() {
        bail!("Not installed: {}", missing.join(", "));
    }
    Ok(())
}
