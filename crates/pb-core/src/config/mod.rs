//! Configuration management for pdv-bridge

mod backend;
pub mod serde_utils;
mod service;
mod timeouts;

pub use backend::BackendConfig;
pub use service::ServiceConfig;
pub use timeouts::TimeoutConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "pdv-bridge";

/// Full configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Point-of-sale backend credentials
    pub backend: BackendConfig,
    /// Managed service layout and commands
    pub service: ServiceConfig,
    /// Timeouts and retry budgets
    pub timeouts: TimeoutConfig,
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Get the default persisted-state path
pub fn default_store_path() -> PathBuf {
    default_config_dir().join("state.json")
}

/// Get the default PID file path for the managed service
pub fn default_pid_path() -> PathBuf {
    default_config_dir().join("service.pid")
}

/// Get the default service log path
pub fn default_service_log_path() -> PathBuf {
    default_config_dir().join("logs").join("service.log")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load the bridge configuration, falling back to defaults when the file is absent
pub fn load_or_default(path: &Path) -> Result<BridgeConfig, ConfigError> {
    match load_config(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            tracing::info!("Config file {:?} not found, using defaults", path);
            Ok(BridgeConfig::default())
        }
        Err(e) => Err(e),
    }
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}
