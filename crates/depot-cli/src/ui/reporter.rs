//! Console reporter: engine progress rendered to stderr.

use std::io::Write;
use std::sync::Mutex;

use crossterm::style::Stylize;
use depot_core::Reporter;
use depot_schema::{GameId, RepoKey};

use super::theme::{Theme, format_size};

/// Writes progress lines to stderr so stdout stays clean for listings.
///
/// Quiet mode keeps warnings, errors and failures and drops the rest.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    theme: Theme,
    quiet: bool,
    out: Mutex<()>,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            theme: Theme::default(),
            quiet,
            out: Mutex::new(()),
        }
    }

    fn line(&self, text: &str) {
        let _guard = self
            .out
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{text}");
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if self.quiet {
            return;
        }
        self.line(&format!("{}", title.with(self.theme.colors.header).bold()));
    }

    fn resolved(&self, query: &str, name: &str, repository: &RepoKey, version: &str) {
        if self.quiet {
            return;
        }
        let c = &self.theme.colors;
        self.line(&format!(
            "  {} {} {} {} {}",
            self.theme.icons.active.with(c.name),
            query.with(c.secondary),
            "→".with(c.secondary),
            name.with(c.name),
            format!("({repository}, {version})").with(c.secondary)
        ));
    }

    fn downloading(&self, game_id: GameId, file: &str, current: u64, total: u64) {
        if self.quiet {
            return;
        }
        let c = &self.theme.colors;
        let progress = if current >= total {
            format_size(total)
        } else {
            format!("{} / {}", format_size(current), format_size(total))
        };
        self.line(&format!(
            "    {} {} {}",
            game_id.to_string().with(c.secondary),
            file,
            progress.with(c.secondary)
        ));
    }

    fn done(&self, game_id: GameId, detail: &str) {
        if self.quiet {
            return;
        }
        let c = &self.theme.colors;
        self.line(&format!(
            "  {} {} {}",
            self.theme.icons.success.with(c.success),
            game_id.to_string().with(c.name),
            detail
        ));
    }

    fn failed(&self, game_id: Option<GameId>, reason: &str) {
        let c = &self.theme.colors;
        let subject = game_id.map(|id| id.to_string()).unwrap_or_default();
        self.line(&format!(
            "  {} {} {}",
            self.theme.icons.error.with(c.error),
            subject.with(c.name),
            reason.with(c.error)
        ));
    }

    fn info(&self, msg: &str) {
        if self.quiet {
            return;
        }
        self.line(&format!(
            "{} {msg}",
            self.theme.icons.info.with(self.theme.colors.secondary)
        ));
    }

    fn warning(&self, msg: &str) {
        self.line(&format!(
            "{} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        ));
    }

    fn error(&self, msg: &str) {
        self.line(&format!(
            "{} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        ));
    }

    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        if self.quiet {
            return;
        }
        let noun = if count == 1 { "package" } else { "packages" };
        self.line(&format!(
            "\n{} {count} {noun} {action} in {elapsed_secs:.1}s",
            self.theme.icons.success.with(self.theme.colors.success)
        ));
    }
}
