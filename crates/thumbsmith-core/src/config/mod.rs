//! Configuration management for thumbsmith.
//!
//! Configuration is loaded from the platform config directory with sensible
//! defaults. All config structs implement `Default`.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for thumbsmith.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Queue settings
    pub queue: QueueConfig,

    /// Bucket names
    pub buckets: BucketConfig,

    /// Worker settings
    pub worker: WorkerConfig,

    /// Redelivery policy
    pub retry: RetryConfig,

    /// Per-step timeouts
    pub timeouts: TimeoutConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Thumbnail settings
    pub thumbnail: ThumbnailConfig,

    /// Upload settings
    pub ingest: IngestConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.thumbsmith.thumbsmith/config.toml
    /// - Linux: ~/.config/thumbsmith/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\thumbsmith\config\config.toml
    ///
    /// Falls back to ~/.thumbsmith/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "thumbsmith", "thumbsmith")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".thumbsmith").join("config.toml")
            })
    }

    /// Get the resolved blob store root (with ~ expansion).
    pub fn store_dir(&self) -> PathBuf {
        expand(&self.general.store_dir)
    }

    /// Get the resolved scratch directory (with ~ expansion).
    pub fn scratch_dir(&self) -> PathBuf {
        expand(&self.general.scratch_dir)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.into_owned())
}
