//! Realtime listen handler

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::broadcast::error::RecvError;

use tether_core::realtime::LogoutPolicy;
use tether_core::LifecycleEvent;

use crate::output::{Output, OutputFormat};

/// Print realtime events until Ctrl-C
///
/// Also keeps the connectivity monitor running, so writes queued by earlier
/// commands are replayed when the API becomes reachable.
pub async fn listen(events: Vec<String>, output: &Output) -> Result<()> {
    let network = super::open_network().await?;

    if !network.tokens.is_authenticated().await {
        bail!("Not signed in. Run `tether login <email>` first.");
    }

    let printer = Arc::new(Output::new(output.format));
    for event in &events {
        let printer = printer.clone();
        let name = event.clone();
        network
            .realtime
            .on(event, move |data| printer.print_event(&name, data));
    }

    let mut lifecycle = network.realtime.subscribe_lifecycle();
    let binding = network.bind_realtime(LogoutPolicy::KeepHandlers).await;
    let monitor = network.start_monitor();
    let mut indicator = monitor.subscribe();

    output.message(&format!(
        "Listening for {} on {} (Ctrl-C to stop)",
        events.join(", "),
        network.config.realtime_url
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = lifecycle.recv() => match event {
                Ok(LifecycleEvent::ReconnectExhausted) => {
                    binding.abort();
                    bail!("Realtime connection lost and could not be re-established");
                }
                Ok(event) => report_lifecycle(&event, output),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            Ok(()) = indicator.changed() => {
                let state = *indicator.borrow_and_update();
                if output.format == OutputFormat::Human {
                    eprintln!("-- network {}", state);
                }
            }
        }
    }

    monitor.shutdown();
    binding.abort();
    network.realtime.disconnect();
    Ok(())
}

fn report_lifecycle(event: &LifecycleEvent, output: &Output) {
    if output.format != OutputFormat::Human {
        return;
    }
    match event {
        LifecycleEvent::Connected => eprintln!("-- connected"),
        LifecycleEvent::ConnectError(e) => eprintln!("-- connect failed: {}", e),
        LifecycleEvent::Disconnected(reason) => eprintln!("-- disconnected ({})", reason),
        LifecycleEvent::Error(e) => eprintln!("-- channel error: {}", e),
        LifecycleEvent::ReconnectExhausted => {}
    }
}
