//! Configuration loading from file and environment.

use crate::{AppConfig, ConfigError, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::Path;

/// Loads `AppConfig` from TOML files with environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<AppConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from environment variables only.
    ///
    /// Variables are prefixed `COPYBOT` and use `__` as section separator,
    /// e.g. `COPYBOT__LEDGER__RPC_URL=http://localhost:8545`.
    pub fn from_env() -> Result<AppConfig> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("COPYBOT").separator("__"))
            .build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }

    /// Load from file, then overlay environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<AppConfig> {
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix("COPYBOT").separator("__"))
            .build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }
}
