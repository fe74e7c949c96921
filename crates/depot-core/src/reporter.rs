//! Reporter trait for dependency injection
//!
//! Lets the engine report progress without being coupled to a specific
//! terminal or GUI presentation.

use depot_schema::{GameId, RepoKey};

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Resolving", "Downloading").
    fn section(&self, title: &str);

    /// A winning candidate was chosen for a query.
    fn resolved(&self, query: &str, name: &str, repository: &RepoKey, version: &str);

    /// Bytes received for one file of a package.
    fn downloading(&self, game_id: GameId, file: &str, current: u64, total: u64);

    /// A package operation finished.
    fn done(&self, game_id: GameId, detail: &str);

    /// A package operation failed.
    fn failed(&self, game_id: Option<GameId>, reason: &str);

    fn info(&self, msg: &str);

    fn warning(&self, msg: &str);

    fn error(&self, msg: &str);

    /// Final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title)
    }
    fn resolved(&self, query: &str, name: &str, repository: &RepoKey, version: &str) {
        (**self).resolved(query, name, repository, version)
    }
    fn downloading(&self, game_id: GameId, file: &str, current: u64, total: u64) {
        (**self).downloading(game_id, file, current, total)
    }
    fn done(&self, game_id: GameId, detail: &str) {
        (**self).done(game_id, detail)
    }
    fn failed(&self, game_id: Option<GameId>, reason: &str) {
        (**self).failed(game_id, reason)
    }
    fn info(&self, msg: &str) {
        (**self).info(msg)
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg)
    }
    fn error(&self, msg: &str) {
        (**self).error(msg)
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs)
    }
}

/// A no-op reporter for silent operations (e.g. tests, scripting).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn resolved(&self, _: &str, _: &str, _: &RepoKey, _: &str) {}
    fn downloading(&self, _: GameId, _: &str, _: u64, _: u64) {}
    fn done(&self, _: GameId, _: &str) {}
    fn failed(&self, _: Option<GameId>, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}
