//! Configuration types for cosync.
//!
//! This module provides the [`Config`] struct which stores the non-secret
//! settings a session needs. Configuration is persisted as TOML (typically at
//! `~/.config/cosync/config.toml` on Unix systems).
//!
//! Credentials are deliberately absent: the credential collaborator hands a
//! [`SessionContext`](crate::session::SessionContext) to the session channel
//! at connect time, and nothing here is ever written back to disk.
//!
//! # Example
//!
//! ```ignore
//! use cosync_core::config::Config;
//!
//! let config = Config::new("https://app.example.com", "ws-123");
//! let timeout = config.request_timeout();
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CosyncError, Result};

/// Default bound on every request/acknowledgment round-trip.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Client version announced to the host when joining a space.
pub const DEFAULT_CLIENT_VERSION: &str = "0.21.0";

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_client_version() -> String {
    DEFAULT_CLIENT_VERSION.to_string()
}

fn default_owner_id() -> String {
    "cosync".to_string()
}

/// Settings for one client session against the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the host (e.g., "https://app.example.com")
    pub endpoint: String,

    /// Workspace the engine operates on
    pub workspace_id: String,

    /// Bound on each request/acknowledgment round-trip, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Version string sent with `space:join`
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// User id stamped as creator/updater on content blocks
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
}

impl Config {
    /// Create a new config with default timeout and client version.
    pub fn new(endpoint: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            workspace_id: workspace_id.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            client_version: default_client_version(),
            owner_id: default_owner_id(),
        }
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save config to a specific path, creating the parent directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file location.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("cosync").join("config.toml"))
            .ok_or(CosyncError::NoConfigDir)
    }

    /// Load config from the default location.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }
}
