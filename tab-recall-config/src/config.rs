//! The `Config` struct, path resolution, and YAML persistence.
//!
//! Covers:
//! - `load` / `save` (YAML file I/O with atomic write)
//! - XDG-style path helpers (`config_dir`, `config_path`, `history_path`)
//! - Semantic validation of loaded values

use crate::error::ConfigError;
use crate::types::LogLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime settings for the history tracker and event router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the tab history is persisted (None = `history.json` in the config dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,

    /// Maximum iterations of the replacement-tab resolution loop
    #[serde(default = "crate::defaults::max_resolve_attempts")]
    pub max_resolve_attempts: usize,

    /// Move newly created tabs next to their opener or the last active tab
    #[serde(default = "crate::defaults::bool_true")]
    pub position_new_tabs: bool,

    /// Verbosity of the debug log file
    #[serde(default = "crate::defaults::log_level")]
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: None,
            max_resolve_attempts: crate::defaults::max_resolve_attempts(),
            position_new_tabs: crate::defaults::bool_true(),
            log_level: crate::defaults::log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file
    ///
    /// A missing file is created with default values; an empty file yields
    /// defaults without being rewritten.
    pub fn load_from(path: &Path) -> Result<Self> {
        log::info!("Config path: {:?}", path);

        if !path.exists() {
            log::info!("Config file not found, creating default at {:?}", path);
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                log::error!("Failed to save default config: {}", e);
                return Err(e);
            }
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .map_err(ConfigError::from)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        if contents.trim().is_empty() {
            log::info!("Config file {:?} is empty, using defaults", path);
            return Ok(Self::default());
        }

        let config: Config = serde_yaml_ng::from_str(&contents)
            .map_err(ConfigError::from)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let yaml = serde_yaml_ng::to_string(self).context("Failed to serialize config")?;

        // Atomic save: write to temp file then rename to prevent corruption on crash
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml)
            .with_context(|| format!("Failed to write config to {:?}", temp_path))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace config at {:?}", path))?;

        Ok(())
    }

    /// Check field values that serde cannot express as types
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolve_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_resolve_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(path) = &self.storage_path
            && path.as_os_str().is_empty()
        {
            return Err(ConfigError::Validation(
                "storage_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the configuration directory path (`~/.config/tab-recall` on Unix)
    pub fn config_dir() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            if let Some(config_dir) = dirs::config_dir() {
                config_dir.join("tab-recall")
            } else {
                PathBuf::from(".")
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir.join(".config").join("tab-recall")
            } else {
                PathBuf::from(".")
            }
        }
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.yaml")
    }

    /// Resolve the file the tab history is persisted to
    pub fn history_path(&self) -> PathBuf {
        match &self.storage_path {
            Some(path) => path.clone(),
            None => Self::config_dir().join("history.json"),
        }
    }
}
