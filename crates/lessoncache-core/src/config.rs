//! Application configuration management.
//!
//! Holds the API base URL, the cache partition versions and the sync tuning
//! knobs. Configuration is stored at `~/.config/lessoncache/config.json`;
//! `LESSONCACHE_BASE_URL` overrides the stored base URL.

use std::path::PathBuf;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "lessoncache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides `base_url`
pub const BASE_URL_ENV: &str = "LESSONCACHE_BASE_URL";

/// Bump on every deployable shell change; older shell partitions are purged on activation.
pub const DEFAULT_SHELL_VERSION: u32 = 7;

pub const DEFAULT_METADATA_VERSION: u32 = 1;

/// Levels with fewer unanswered questions than this are re-synced.
pub const DEFAULT_SYNC_THRESHOLD: usize = 50;

pub const DEFAULT_QUESTIONS_PER_SKILL: usize = 30;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API base, e.g. `https://example.org/api`. Shell assets live at its origin root.
    pub base_url: String,
    pub shell_version: u32,
    pub metadata_version: u32,
    pub sync_threshold: usize,
    pub questions_per_skill: usize,
    pub request_timeout_secs: u64,
    /// Cross-origin hosts whose responses may be stored in the shell partition.
    pub cross_origin_allowlist: Vec<String>,
    /// Overrides the platform cache directory when set.
    pub cache_dir: Option<PathBuf>,
    /// Overrides the platform data directory when set.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            shell_version: DEFAULT_SHELL_VERSION,
            metadata_version: DEFAULT_METADATA_VERSION,
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
            questions_per_skill: DEFAULT_QUESTIONS_PER_SKILL,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cross_origin_allowlist: Vec::new(),
            cache_dir: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Config pointing at `base_url` with every other field defaulted.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env();
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

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.is_empty() {
                self.base_url = url;
            }
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

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Parsed API base URL. A trailing slash is trimmed from the path.
    pub fn api_base(&self) -> Result<Url> {
        let trimmed = self.base_url.trim_end_matches('/');
        Url::parse(trimmed).with_context(|| format!("Invalid base URL: {}", self.base_url))
    }

    pub fn shell_partition(&self) -> String {
        format!("{}-shell-v{}", APP_NAME, self.shell_version)
    }

    pub fn metadata_partition(&self) -> String {
        format!("{}-api-metadata-v{}", APP_NAME, self.metadata_version)
    }

    /// Partitions that survive activation.
    pub fn partition_whitelist(&self) -> Vec<String> {
        vec![self.shell_partition(), self.metadata_partition()]
    }
}
