//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for confab
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Base URL of the chat-completions endpoint
    pub base_url: Option<String>,
    /// Identity used as the quota and store partition key
    pub identity: Option<String>,
    /// API key (alternative to the CONFAB_API_KEY environment variable)
    pub api_key: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("confab")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for CONFAB_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("CONFAB_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Get the local data directory (conversations, quota)
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("confab")
    }

    /// Load config from file, falling back to defaults on any problem
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) => {
                tracing::warn!("failed to read config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn from_toml(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("invalid config file, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Resolve the API key from config or environment
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("CONFAB_API_KEY").ok())
    }
}
