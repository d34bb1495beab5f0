//! Configuration for the attendance client.
//!
//! Defaults match the fixed deployment constants; a TOML file can override
//! any of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable that overrides the configuration directory.
pub const HOME_ENV_VAR: &str = "LECTURER_BEACON_HOME";

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL every API endpoint is appended to.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Page the session guard redirects to when no token is present.
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Storage key holding the bearer token.
    #[serde(default = "default_token_key")]
    pub token_key: String,

    /// Interval between beacon polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long the device chooser scans before offering candidates.
    #[serde(default = "default_discovery_window_ms")]
    pub discovery_window_ms: u64,

    /// Only offer devices whose advertised name contains this string.
    #[serde(default)]
    pub device_name_filter: Option<String>,

    /// Location of the token storage file.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_login_path() -> String {
    "login.html".to_string()
}

fn default_token_key() -> String {
    "token".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_discovery_window_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            login_path: default_login_path(),
            token_key: default_token_key(),
            poll_interval_ms: default_poll_interval_ms(),
            discovery_window_ms: default_discovery_window_ms(),
            device_name_filter: None,
            storage_path: None,
        }
    }
}

impl Config {
    /// Load configuration from disk, writing defaults if no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save_to(&path)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        if config.poll_interval_ms == 0 {
            return Err(Error::InvalidParameter {
                name: "poll_interval_ms".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(config)
    }

    /// Save configuration to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Poll interval as a duration. Zero falls back to the default.
    pub fn poll_interval(&self) -> Duration {
        let ms = match self.poll_interval_ms {
            0 => default_poll_interval_ms(),
            ms => ms,
        };
        Duration::from_millis(ms)
    }

    /// Device discovery window as a duration.
    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    /// Token storage file, falling back to the platform data directory.
    pub fn resolved_storage_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage_path {
            return Ok(path.clone());
        }
        Ok(Self::base_dir(dirs::data_dir())?.join("storage.json"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir(dirs::config_dir())?.join("config.toml"))
    }

    fn base_dir(platform_dir: Option<PathBuf>) -> Result<PathBuf> {
        if let Ok(home) = env::var(HOME_ENV_VAR) {
            return Ok(PathBuf::from(home));
        }
        platform_dir
            .map(|dir| dir.join("lecturer-beacon"))
            .ok_or(Error::ConfigDirNotFound)
    }
}
