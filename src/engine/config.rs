//! binpatch Configuration Module
//! Handles loading and validating binpatch.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::platform::PlatformSet;

pub const CONFIG_FILE_NAME: &str = "binpatch.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Update server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Root directory of the artifact store
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub supported_platforms: PlatformSet,
    /// Largest accepted upload request body, base64 overhead included
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/tmp/bindata")
}

fn default_max_upload_bytes() -> usize {
    512 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_dir: default_base_dir(),
            supported_platforms: PlatformSet::default(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    /// Load from a config file path, or from `binpatch.config.json` inside a directory
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: ServerConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_platforms.is_empty() {
            return Err(ConfigError::Invalid(
                "supported_platforms must not be empty".to_string(),
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_upload_bytes must be positive".to_string(),
            ));
        }
        if self.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("base_dir must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Patch client settings, assembled from CLI flags
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:8080`
    pub server_url: String,
    /// Application name as known to the server
    pub name: String,
    /// Version the client currently runs
    pub current_version: String,
    /// Executable to replace
    pub target: PathBuf,
    pub timeout: Duration,
    /// Keep `.<exe>.old` after a successful swap
    pub keep_backup: bool,
}

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
