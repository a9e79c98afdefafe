//! Application configuration management.
//!
//! This module handles loading and saving the configuration: which Firestore
//! project and database to read from, the API key, and where snapshots and
//! logs are written.
//!
//! Configuration is stored at `~/.config/disastercache/config.json`.
//! `DISASTERCACHE_PROJECT_ID` and `DISASTERCACHE_API_KEY` override the file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_DATABASE;
use crate::cache::CacheOptions;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "disastercache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const PROJECT_ID_ENV: &str = "DISASTERCACHE_PROJECT_ID";
const API_KEY_ENV: &str = "DISASTERCACHE_API_KEY";

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_true")]
    pub persist_to_disk: bool,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Write a daily log file here in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: None,
            api_key: None,
            database: default_database(),
            persist_to_disk: true,
            cache_dir: None,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project_id) = lookup(PROJECT_ID_ENV).filter(|v| !v.is_empty()) {
            self.project_id = Some(project_id);
        }
        if let Some(api_key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            self.api_key = Some(api_key);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            persist_to_disk: self.persist_to_disk,
        }
    }

    /// The project id, or an error telling the user how to set one.
    pub fn require_project_id(&self) -> Result<&str> {
        self.project_id.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No Firestore project configured. Set {} or add project_id to {}",
                PROJECT_ID_ENV,
                CONFIG_FILE
            )
        })
    }
}
