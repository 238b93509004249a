//! Client configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tether/config.toml)
//! 3. Environment variables (TETHER_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::realtime::ReconnectPolicy;
use crate::storage::atomic_write;

/// Environment variable prefix
const ENV_PREFIX: &str = "TETHER";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL that request paths are joined onto
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// WebSocket endpoint of the realtime channel
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    /// Directory for credentials, cache and offline queue
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Login endpoint path (exempt from bearer injection)
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Refresh endpoint path (exempt from bearer injection)
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Upper bound for a single request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Age after which a cached response is reported as stale
    #[serde(default = "default_cache_freshness_secs")]
    pub cache_freshness_secs: u64,

    /// How long the "syncing" indicator stays up after a replay
    #[serde(default = "default_syncing_display_ms")]
    pub syncing_display_ms: u64,

    /// Interval of the reachability probe behind the connectivity monitor
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Realtime reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Realtime reconnection settings, in file-friendly units
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_server_restart_delay_ms")]
    pub server_restart_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            server_restart_delay_ms: default_server_restart_delay_ms(),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        ReconnectPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            server_restart_delay: Duration::from_millis(config.server_restart_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            realtime_url: default_realtime_url(),
            data_dir: default_data_dir(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_freshness_secs: default_cache_freshness_secs(),
            syncing_display_ms: default_syncing_display_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default config file plus environment overrides
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path`, falling back to defaults when it does not exist
    ///
    /// Environment overrides apply either way, and the data directory is
    /// created.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file: {:?}", path))
            }
        };

        config.apply_env_overrides();
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;
        Ok(config)
    }

    /// Parse a TOML document and apply environment overrides
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_value("API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = env_value("REALTIME_URL") {
            self.realtime_url = url;
        }
        if let Some(dir) = env_value("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        // Unparsable values are ignored rather than failing start-up
        if let Some(secs) = env_value("REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.request_timeout_secs = secs;
        }
    }

    /// Write the configuration to [`Config::config_file_path`]
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        atomic_write(&path, content.as_bytes())
            .with_context(|| format!("Failed to write config file: {:?}", path))
    }

    /// `TETHER_CONFIG`, or `config.toml` under the platform config dir
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_value("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tether")
            .join("config.toml")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_freshness(&self) -> Duration {
        Duration::from_secs(self.cache_freshness_secs)
    }

    pub fn syncing_display(&self) -> Duration {
        Duration::from_millis(self.syncing_display_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from(&self.reconnect)
    }

    /// Path of the credential file
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    /// Path of the persisted response cache
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("response_cache.json")
    }

    /// Path of the persisted offline queue
    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("offline_queue.json")
    }
}

/// Non-empty value of `TETHER_<name>`
fn env_value(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.is_empty())
}

fn default_api_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_realtime_url() -> String {
    "ws://localhost:3000/realtime".to_string()
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_cache_freshness_secs() -> u64 {
    300
}

fn default_syncing_display_ms() -> u64 {
    2000
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_server_restart_delay_ms() -> u64 {
    3000
}
