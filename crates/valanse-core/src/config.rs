//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend and canonical application URLs, the credential store backend, and
//! the session policies (refresh failure handling, request gating).
//!
//! Configuration is stored at `~/.config/valanse/config.json`. A missing file
//! yields defaults; `VALANSE_*` environment variables override loaded values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "valanse";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend serving the token and resource endpoints
pub const DEFAULT_API_BASE_URL: &str = "https://valanse.site";

/// Canonical application URL; the target of every post-flow redirect
pub const DEFAULT_APP_URL: &str = "https://valanse.vercel.app/";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on how long a request waits for activation to settle.
const DEFAULT_READY_TIMEOUT_SECS: u64 = 10;

/// Where the credential slots are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
    Keyring,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "file" => Some(StoreBackend::File),
            "keyring" => Some(StoreBackend::Keyring),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub app_url: String,
    pub store_backend: StoreBackend,
    /// Keep the current access credential when a silent refresh fails.
    /// When false, a failed refresh clears it and the visitor becomes anonymous.
    pub keep_on_refresh_failure: bool,
    /// Hold outbound requests until session activation has settled.
    pub wait_for_session_ready: bool,
    pub ready_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            store_backend: StoreBackend::default(),
            keep_on_refresh_failure: true,
            wait_for_session_ready: true,
            ready_timeout_secs: DEFAULT_READY_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply `VALANSE_*` overrides from the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VALANSE_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("VALANSE_APP_URL") {
            self.app_url = url;
        }
        if let Some(backend) = lookup("VALANSE_STORE") {
            match StoreBackend::parse(&backend) {
                Some(b) => self.store_backend = b,
                None => warn!(value = %backend, "Ignoring unknown VALANSE_STORE value"),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}
