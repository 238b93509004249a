//! Connectivity monitor
//!
//! Consumes reachability reports (`true` = connected) and drives the
//! user-facing [`NetworkIndicator`]. An offline-to-online transition
//! triggers one replay of the offline queue, with the indicator showing
//! `Syncing` for a short display window afterwards.
//!
//! Reports normally come from [`spawn_probe`], but any
//! `mpsc::Receiver<bool>` works, which is how the tests drive it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::queue::{MutationSender, OfflineQueue, ReplayReport};

/// Three-state network indicator shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkIndicator {
    Offline,
    Syncing,
    Online,
}

impl std::fmt::Display for NetworkIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            NetworkIndicator::Offline => "offline",
            NetworkIndicator::Syncing => "syncing",
            NetworkIndicator::Online => "online",
        };
        f.write_str(label)
    }
}

/// Handle to the background monitor task
///
/// Dropping the handle stops the task.
pub struct ConnectivityMonitor {
    indicator: watch::Receiver<NetworkIndicator>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Start monitoring `reports`
    ///
    /// The indicator starts as `Online` until the first report arrives.
    pub fn spawn(
        reports: mpsc::Receiver<bool>,
        queue: Arc<OfflineQueue>,
        sender: Arc<dyn MutationSender>,
        syncing_display: Duration,
    ) -> Self {
        let (indicator_tx, indicator_rx) = watch::channel(NetworkIndicator::Online);

        let task = tokio::spawn(monitor_loop(
            reports,
            queue,
            sender,
            syncing_display,
            indicator_tx,
        ));

        Self {
            indicator: indicator_rx,
            task,
        }
    }

    /// Current indicator state
    pub fn indicator(&self) -> NetworkIndicator {
        *self.indicator.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.indicator() != NetworkIndicator::Offline
    }

    /// Watch indicator changes
    pub fn subscribe(&self) -> watch::Receiver<NetworkIndicator> {
        self.indicator.clone()
    }

    /// Stop the monitor
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn monitor_loop(
    mut reports: mpsc::Receiver<bool>,
    queue: Arc<OfflineQueue>,
    sender: Arc<dyn MutationSender>,
    syncing_display: Duration,
    indicator: watch::Sender<NetworkIndicator>,
) {
    let mut connected: Option<bool> = None;
    // End of the current syncing display window
    let mut settle_at: Option<Instant> = None;
    // Replay pass in flight, and whether another one was asked for meanwhile
    let mut replay: Option<JoinHandle<ReplayReport>> = None;
    let mut rerun = false;

    loop {
        tokio::select! {
            report = reports.recv() => {
                let Some(now_connected) = report else {
                    debug!("Connectivity source closed, monitor stopping");
                    break;
                };
                let previous = connected.replace(now_connected);

                let start = match (previous, now_connected) {
                    (Some(false), true) => {
                        info!("Network restored");
                        true
                    }
                    // Writes left over from a previous run
                    (None, true) => {
                        let pending = !queue.is_empty().await;
                        if !pending {
                            indicator.send_replace(NetworkIndicator::Online);
                        }
                        pending
                    }
                    (previous, false) if previous != Some(false) => {
                        info!("Network lost");
                        settle_at = None;
                        rerun = false;
                        indicator.send_replace(NetworkIndicator::Offline);
                        false
                    }
                    _ => false,
                };

                if start {
                    settle_at = None;
                    indicator.send_replace(NetworkIndicator::Syncing);
                    if replay.is_some() {
                        rerun = true;
                    } else {
                        replay = Some(spawn_replay(&queue, &sender));
                    }
                }
            }
            finished = wait_replay(&mut replay), if replay.is_some() => {
                replay = None;
                if let Some(report) = finished {
                    if let Some(ref reason) = report.halted {
                        warn!(
                            "Sync stopped with {} mutation(s) pending: {}",
                            report.remaining, reason
                        );
                    }
                }

                if connected != Some(true) {
                    continue;
                }
                if std::mem::take(&mut rerun) {
                    replay = Some(spawn_replay(&queue, &sender));
                } else {
                    settle_at = Some(Instant::now() + syncing_display);
                }
            }
            _ = tokio::time::sleep_until(settle_at.unwrap_or_else(Instant::now)), if settle_at.is_some() => {
                settle_at = None;
                if connected == Some(true) {
                    indicator.send_replace(NetworkIndicator::Online);
                }
            }
        }
    }
}

/// Run one replay pass off the monitor task, so connectivity reports keep
/// being handled while it is in flight
fn spawn_replay(
    queue: &Arc<OfflineQueue>,
    sender: &Arc<dyn MutationSender>,
) -> JoinHandle<ReplayReport> {
    let queue = queue.clone();
    let sender = sender.clone();
    tokio::spawn(async move { queue.replay(sender.as_ref()).await })
}

async fn wait_replay(task: &mut Option<JoinHandle<ReplayReport>>) -> Option<ReplayReport> {
    match task {
        Some(handle) => match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Replay task failed: {}", e);
                None
            }
        },
        None => std::future::pending().await,
    }
}

/// Poll `url` every `interval` and report reachability changes
///
/// Any HTTP response counts as reachable; only transport failures count
/// as offline. Only changes are reported, plus the first result. The task
/// ends once the receiver is dropped.
pub fn spawn_probe(url: String, interval: Duration) -> mpsc::Receiver<bool> {
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut last: Option<bool> = None;

        while !tx.is_closed() {
            let reachable = client
                .head(&url)
                .timeout(interval.max(Duration::from_secs(1)))
                .send()
                .await
                .is_ok();

            if last != Some(reachable) {
                debug!("Probe of {}: reachable={}", url, reachable);
                last = Some(reachable);
                if tx.send(reachable).await.is_err() {
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => break,
            }
        }
        debug!("Probe of {} stopped", url);
    });

    rx
}
