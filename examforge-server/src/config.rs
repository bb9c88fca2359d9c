use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use examforge_storage::DataLayerConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::logging::LogFormat;

/// Prefix for environment overrides, e.g. `EXAMFORGE__PORT=9000`.
pub const ENV_PREFIX: &str = "EXAMFORGE";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// How long background tasks and handles get to close on shutdown.
    pub shutdown_timeout_secs: u64,
    pub data: DataLayerConfig,
}

impl Config {
    /// Loads `config/default`, then `config/local`, then `EXAMFORGE__*` variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config"), Self::env_source())
    }

    pub fn load_from(dir: &Path, env: Environment) -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            .add_source(env)
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn env_source() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            shutdown_timeout_secs: 30,
            data: DataLayerConfig::default(),
        }
    }
}
