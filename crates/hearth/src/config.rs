//! Hub configuration
//!
//! Merge order, later overrides earlier:
//! 1. Compiled defaults
//! 2. TOML file (`--config`, or `./hearth.toml` when present)
//! 3. `HEARTH_*` environment variables
//!
//! Command-line flags are applied on top by the binary.

#![allow(clippy::result_large_err)]

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use hearth_bus::DEFAULT_ROUTER_CAPACITY;

/// `database_path` value selecting the in-memory device store
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the plugin broker listens on
    pub broker_addr: String,
    /// redb file holding devices, or `memory`
    pub database_path: String,
    /// How long a start/stop command waits for an ack
    pub command_timeout_ms: u64,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
    /// Per-topic buffer in the broker's router
    pub router_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:1883".to_string(),
            database_path: "./data/hearth.redb".to_string(),
            command_timeout_ms: 5000,
            log_filter: "hearth=info".to_string(),
            router_capacity: DEFAULT_ROUTER_CAPACITY,
        }
    }
}

impl HubConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_path == MEMORY_DATABASE
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.router_capacity == 0 {
            return Err(ConfigError::Invalid(
                "router_capacity must be greater than zero".into(),
            ));
        }
        if self.broker_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("broker_addr must not be empty".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Load configuration from `path` (or `./hearth.toml`) with env overrides
pub fn load_config(path: Option<&Path>) -> Result<HubConfig, ConfigError> {
    let file = path.unwrap_or_else(|| Path::new("hearth.toml"));
    let config: HubConfig = Figment::new()
        .merge(Serialized::defaults(HubConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("HEARTH_"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from TOML text only
pub fn load_config_from_str(toml_content: &str) -> Result<HubConfig, ConfigError> {
    let config: HubConfig = Figment::new()
        .merge(Serialized::defaults(HubConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()?;
    config.validate()?;
    Ok(config)
}
