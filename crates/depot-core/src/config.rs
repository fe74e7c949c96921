//! Configuration loading (`config.toml`).
//!
//! A missing file yields defaults with no repositories. Writing the file back
//! is left to whoever edits it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use depot_schema::{RepositoryDescriptor, TargetAgent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acquire::DEFAULT_DOWNLOAD_CONCURRENCY;
use crate::catalog::DEFAULT_TTL;
use crate::error::EngineError;
use crate::io::transport::{DEFAULT_MAX_ATTEMPTS, TransportConfig};
use crate::registry::SourceRegistry;
use crate::resolver::DEFAULT_SEARCH_CONCURRENCY;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// `[network]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub download_concurrency: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
        }
    }
}

/// `[catalog]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub ttl_secs: u64,
    pub search_concurrency: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            search_concurrency: DEFAULT_SEARCH_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub access_token: Option<String>,
    pub prefer_mirror: bool,
    pub agent: TargetAgent,
    pub network: NetworkConfig,
    pub catalog: CatalogConfig,
    pub repositories: Vec<RepositoryDescriptor>,
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_attempts == 0 {
            return Err(ConfigError::Invalid("network.max_attempts must be at least 1".into()));
        }
        if self.network.timeout_secs == 0 {
            return Err(ConfigError::Invalid("network.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.catalog.ttl_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.network.timeout_secs),
            max_attempts: self.network.max_attempts,
            initial_backoff: Duration::from_millis(self.network.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.network.max_backoff_ms),
            token: self.access_token.clone().filter(|t| !t.trim().is_empty()),
            ..TransportConfig::default()
        }
    }

    pub fn registry(&self) -> Result<SourceRegistry, EngineError> {
        SourceRegistry::new(self.repositories.clone())
    }
}
