//! Client configuration.
//!
//! Stored as camelCase JSON in `~/.config/kodi-rpc/config.json`:
//!
//! ```json
//! { "host": "kodi.local", "port": 9090, "connectImmediately": true, "requestTimeoutMs": 30000 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::kodi_url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9999;

/// Connection settings for a [`crate::KodiClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect as soon as the client is opened.
    #[serde(default = "default_connect_immediately")]
    pub connect_immediately: bool,

    /// Upper bound on how long `execute` waits for a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_immediately() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_immediately: default_connect_immediately(),
            request_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_connect_immediately(mut self, connect_immediately: bool) -> Self {
        self.connect_immediately = connect_immediately;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn url(&self) -> Option<String> {
        kodi_url(&self.host, self.port)
    }

    /// Load config from file, falling back to defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Default config file location (`$XDG_CONFIG_HOME/kodi-rpc/config.json`).
///
/// # Errors
///
/// Returns `Error::Config` if no home directory can be determined.
pub fn default_config_path() -> Result<PathBuf> {
    let project = ProjectDirs::from("", "", "kodi-rpc")
        .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?;
    Ok(project.config_dir().join("config.json"))
}
