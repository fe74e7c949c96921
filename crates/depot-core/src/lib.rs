//! Manifest resolution and acquisition engine.
//!
//! Query flow: [`resolver`] (over the [`catalog`] cache and
//! [`io::transport`]) picks an entry, [`acquire`] stages and verifies its
//! files, [`assemble`] lays them out for an unlock agent and [`library`]
//! reconciles the result with what is already installed.

pub mod acquire;
pub mod assemble;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod library;
pub mod paths;
pub mod registry;
pub mod reporter;
pub mod resolver;

pub use config::Config;
pub use engine::{Engine, InstallReport, InstallRequest};
pub use error::EngineError;
pub use paths::*;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("depot-core/", env!("CARGO_PKG_VERSION"));
