//! Terminal output: theme, column-aligned listings and the console reporter.

pub mod list;
pub mod reporter;
pub mod theme;

pub use reporter::ConsoleReporter;
pub use theme::Theme;
