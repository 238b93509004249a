//! Status command handler

use std::time::Duration;

use anyhow::Result;

use tether_core::{spawn_probe, NetworkIndicator};

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(output: &Output) -> Result<()> {
    let network = super::open_network().await?;
    let config = &network.config;

    let user = network.tokens.user().await;
    let pending = network.queue.len().await;
    let cached = network.cache.len().await;

    // One probe round, bounded by the request timeout
    let mut probe = spawn_probe(config.api_base_url.clone(), Duration::from_secs(60));
    let reachable = tokio::time::timeout(config.request_timeout(), probe.recv())
        .await
        .ok()
        .flatten()
        .unwrap_or(false);
    let indicator = if reachable {
        NetworkIndicator::Online
    } else {
        NetworkIndicator::Offline
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "signed_in": user.is_some(),
                    "user": user,
                    "network": indicator,
                    "api_base_url": config.api_base_url,
                    "realtime_url": config.realtime_url,
                    "queue": { "pending": pending },
                    "cache": { "entries": cached },
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", indicator);
        }
        OutputFormat::Human => {
            println!("Tether Status");
            println!("=============");
            println!();
            println!("Session:");
            match user {
                Some(ref user) => {
                    println!("  Signed in as: {}", user.display_name());
                    if let Some(ref role) = user.role {
                        println!("  Role:         {}", role);
                    }
                }
                None => println!("  Not signed in"),
            }
            println!();
            println!("Network:");
            println!("  API:      {} ({})", config.api_base_url, indicator);
            println!("  Realtime: {}", config.realtime_url);
            println!();
            println!("Storage:");
            println!("  Location:       {}", config.data_dir.display());
            println!("  Queued writes:  {}", pending);
            println!("  Cached reads:   {}", cached);
        }
    }

    Ok(())
}
