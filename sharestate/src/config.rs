//! Server configuration
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Longest component name accepted by default
pub const DEFAULT_MAX_NAME_LEN: usize = 255;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for one server instance
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Component names longer than this fail with `NameTooLong`
    pub max_name_len: usize,

    /// EXCLUSIVE4 creation is available
    pub exclusive_create: bool,

    /// Instance is inside its reclaim grace period
    pub grace_period: bool,

    /// Instance identifier embedded in every stateid, drawn at random
    /// on startup when unset
    pub boot_epoch: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            exclusive_create: true,
            grace_period: false,
            boot_epoch: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Epoch to stamp into stateids. Each call without a configured
    /// epoch draws a new one, so instances started within the same
    /// second still tell their stateids apart.
    pub fn epoch(&self) -> u32 {
        self.boot_epoch.unwrap_or_else(rand::random)
    }
}
