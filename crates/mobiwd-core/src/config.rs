//! Persistent configuration for mobiwd.
//!
//! Stores driver defaults in `~/.mobiwd/config.json`: where the native agent's
//! forwarded port lives and how long element lookups wait by default.
//!
//! # Example
//!
//! ```no_run
//! use mobiwd_core::config::DriverConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = DriverConfig::load();
//! println!("agent at {}:{}", config.agent_host, config.proxy_port);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const CONFIG_FILENAME: &str = "config.json";

/// Returns the mobiwd home directory (`~/.mobiwd/`), creating it if needed.
pub fn mobiwd_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mobiwd");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Returns the logs directory (`~/.mobiwd/logs/`), creating it if needed.
pub fn logs_dir() -> PathBuf {
    let dir = mobiwd_dir().join("logs");
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn default_proxy_port() -> u16 {
    8900
}

fn default_agent_host() -> String {
    "127.0.0.1".to_string()
}

fn default_implicit_wait_ms() -> u64 {
    5000
}

/// Persistent driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Local port forwarded to the native agent.
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    /// Host the native agent port is reachable on.
    #[serde(default = "default_agent_host")]
    pub agent_host: String,

    /// Initial implicit wait for element lookups.
    #[serde(default = "default_implicit_wait_ms")]
    pub implicit_wait_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            proxy_port: default_proxy_port(),
            agent_host: default_agent_host(),
            implicit_wait_ms: default_implicit_wait_ms(),
        }
    }
}

impl DriverConfig {
    /// Load config from `~/.mobiwd/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&mobiwd_dir().join(CONFIG_FILENAME))
    }

    /// Load config from an explicit path, with the same fallback as [`load`](Self::load).
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Write config as pretty JSON to `path`.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn implicit_wait(&self) -> Duration {
        Duration::from_millis(self.implicit_wait_ms)
    }
}
