//! Configuration for the sync core

use crate::error::{Result, SyncError};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::outbox::OutboxConfig;
use crate::store::{SledBackendConfig, DEFAULT_FEED_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pbis-sync")
}

/// Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Directory holding the local store
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Post uploads in flight at once during a flush
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Capacity of the notification channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Capacity of the store mutation feed
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_concurrent_uploads() -> usize {
    2
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_feed_capacity() -> usize {
    DEFAULT_FEED_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            storage_dir: default_storage_dir(),
            request_timeout_secs: default_request_timeout(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            event_capacity: default_event_capacity(),
            feed_capacity: default_feed_capacity(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SyncError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("api_base_url is empty".into()));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(SyncError::Config("max_concurrent_uploads must be at least 1".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Path of the sled database
    pub fn store_path(&self) -> PathBuf {
        self.storage_dir.join("store.sled")
    }

    /// Path of the config file
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn store_config(&self) -> SledBackendConfig {
        SledBackendConfig {
            db_path: self.store_path(),
            feed_capacity: self.feed_capacity,
            ..Default::default()
        }
    }

    pub fn outbox_config(&self) -> OutboxConfig {
        OutboxConfig {
            max_concurrent_uploads: self.max_concurrent_uploads,
        }
    }

    #[cfg(feature = "client")]
    pub fn http_config(&self) -> crate::api::HttpApiConfig {
        crate::api::HttpApiConfig {
            base_url: self.api_base_url.clone(),
            timeout: self.request_timeout(),
        }
    }
}
