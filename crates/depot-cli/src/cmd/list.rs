//! List command

use anyhow::Result;

use crate::context::Context;
use crate::ui::list::{print_footer, print_list_header, print_list_row};

/// List installed packages
pub fn list(ctx: &Context) -> Result<()> {
    let library = ctx.open_library()?;
    let entries = library.entries()?;

    if entries.is_empty() {
        println!("No packages installed");
        return Ok(());
    }

    print_list_header();
    for entry in &entries {
        print_list_row(
            &entry.game_id.to_string(),
            entry.version.as_str(),
            entry.repository.as_str(),
            entry.files.len(),
            &entry.installed_at.format("%Y-%m-%d %H:%M").to_string(),
        );
    }
    let n = entries.len();
    print_footer(&format!(
        "{n} {} in {}",
        if n == 1 { "package" } else { "packages" },
        library.root().display()
    ));
    Ok(())
}
