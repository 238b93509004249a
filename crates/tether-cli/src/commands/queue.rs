//! Offline queue handlers

use anyhow::Result;

use crate::output::Output;

/// List pending writes
pub async fn list(output: &Output) -> Result<()> {
    let network = super::open_network().await?;
    let pending = network.queue.pending().await;
    output.print_queue(&pending);
    Ok(())
}

/// Deliver pending writes now
pub async fn replay(output: &Output) -> Result<()> {
    let network = super::open_network().await?;

    if network.queue.is_empty().await {
        output.print_replay(&Default::default());
        return Ok(());
    }

    output.message(&format!(
        "Replaying {} queued write(s)...",
        network.queue.len().await
    ));
    let report = network.queue.replay(network.client.as_ref()).await;
    output.print_replay(&report);
    Ok(())
}
