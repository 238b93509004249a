//! Command handlers

pub mod auth;
pub mod config;
pub mod listen;
pub mod queue;
pub mod request;
pub mod status;

use anyhow::{Context, Result};
use tracing::debug;

use tether_core::{Config, Network};

/// Parse a `key=value` argument
pub fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

/// Open the network layer with the configuration from disk
pub async fn open_network() -> Result<Network> {
    let config = Config::load().context("Failed to load configuration")?;
    debug!(
        "Opening network layer (api {}, data {})",
        config.api_base_url,
        config.data_dir.display()
    );
    Network::open_with_config(config).await
}
