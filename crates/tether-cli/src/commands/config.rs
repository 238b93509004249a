//! Config command handlers

use anyhow::{bail, Context, Result};

use tether_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "api_base_url, realtime_url, data_dir, login_path, refresh_path, \
                    request_timeout_secs, cache_freshness_secs, syncing_display_ms, \
                    probe_interval_secs, \
                    reconnect.max_attempts, reconnect.initial_delay_ms, \
                    reconnect.max_delay_ms, reconnect.server_restart_delay_ms";

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.api_base_url);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  api_base_url:         {}", config.api_base_url);
            println!("  realtime_url:         {}", config.realtime_url);
            println!("  data_dir:             {}", config.data_dir.display());
            println!("  login_path:           {}", config.login_path);
            println!("  refresh_path:         {}", config.refresh_path);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!("  cache_freshness_secs: {}", config.cache_freshness_secs);
            println!("  syncing_display_ms:   {}", config.syncing_display_ms);
            println!("  probe_interval_secs:  {}", config.probe_interval_secs);
            println!("  reconnect:");
            println!("    max_attempts:            {}", config.reconnect.max_attempts);
            println!("    initial_delay_ms:        {}", config.reconnect.initial_delay_ms);
            println!("    max_delay_ms:            {}", config.reconnect.max_delay_ms);
            println!(
                "    server_restart_delay_ms: {}",
                config.reconnect.server_restart_delay_ms
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Print the config file path
pub fn path(output: &Output) -> Result<()> {
    let path = Config::config_file_path();
    if output.is_json() {
        println!("{}", serde_json::json!({ "path": path }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let number = |name: &str| -> Result<u64> {
        value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}. Expected a number.", name))
    };

    match key {
        "api_base_url" => config.api_base_url = value.to_string(),
        "realtime_url" => config.realtime_url = value.to_string(),
        "data_dir" => config.data_dir = value.into(),
        "login_path" => config.login_path = value.to_string(),
        "refresh_path" => config.refresh_path = value.to_string(),
        "request_timeout_secs" => config.request_timeout_secs = number(key)?,
        "cache_freshness_secs" => config.cache_freshness_secs = number(key)?,
        "syncing_display_ms" => config.syncing_display_ms = number(key)?,
        "probe_interval_secs" => config.probe_interval_secs = number(key)?,
        "reconnect.max_attempts" => {
            config.reconnect.max_attempts = u32::try_from(number(key)?)
                .context("Invalid value for reconnect.max_attempts. Number is too large.")?
        }
        "reconnect.initial_delay_ms" => config.reconnect.initial_delay_ms = number(key)?,
        "reconnect.max_delay_ms" => config.reconnect.max_delay_ms = number(key)?,
        "reconnect.server_restart_delay_ms" => {
            config.reconnect.server_restart_delay_ms = number(key)?
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }

    Ok(())
}
