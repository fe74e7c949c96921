//! Command implementations

pub mod completions;
pub mod install;
pub mod list;
pub mod refresh;
pub mod remove;
pub mod repos;
pub mod search;

pub use completions::completions;
pub use install::install;
pub use list::list;
pub use refresh::refresh;
pub use remove::remove;
pub use repos::repos;
pub use search::search;
