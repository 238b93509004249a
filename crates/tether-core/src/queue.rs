//! Offline mutation queue
//!
//! Writes that could not reach the server are kept here in arrival order
//! and replayed once connectivity returns. Replay is strictly sequential:
//! the head is sent, removed only on success, and the first failure stops
//! the pass with everything from that item onward left in place.
//!
//! The queue file is rewritten atomically on every change, so the queue
//! survives a restart with its order intact.

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ClientResult;
use crate::http::{ApiRequest, Method};
use crate::storage::{load_json, save_json, StorageResult};

/// A write waiting for the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    /// Local identifier, never sent to the server
    pub id: Uuid,
    pub request: ApiRequest,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMutation {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            enqueued_at: Utc::now(),
        }
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }
}

/// Delivers a queued mutation during replay
///
/// Implementations must not put the mutation back into the queue when
/// delivery fails; the queue keeps it in place itself.
#[async_trait]
pub trait MutationSender: Send + Sync {
    async fn send_mutation(&self, mutation: &QueuedMutation) -> ClientResult<()>;
}

/// Outcome of one replay pass
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReplayReport {
    /// Mutations delivered and removed
    pub replayed: usize,
    /// Mutations still queued after the pass
    pub remaining: usize,
    /// Error that stopped the pass, if any
    pub halted: Option<String>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none() && self.remaining == 0
    }
}

pub struct OfflineQueue {
    items: Mutex<VecDeque<QueuedMutation>>,
    path: Option<PathBuf>,
    /// Serializes replay passes
    replay_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn in_memory() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            path: None,
            replay_lock: Mutex::new(()),
        }
    }

    /// Queue persisted to `path`, restoring pending items if present
    pub fn with_path(path: PathBuf) -> StorageResult<Self> {
        let items: VecDeque<QueuedMutation> = load_json(&path)?.unwrap_or_default();
        if !items.is_empty() {
            info!("Restored {} queued mutation(s)", items.len());
        }

        Ok(Self {
            items: Mutex::new(items),
            path: Some(path),
            replay_lock: Mutex::new(()),
        })
    }

    /// Append a mutation at the tail
    ///
    /// If the queue cannot be persisted the mutation is not kept in memory
    /// either.
    pub async fn add(&self, mutation: QueuedMutation) -> StorageResult<()> {
        let mut items = self.items.lock().await;
        debug!(
            "Queueing {} {} ({})",
            mutation.method(),
            mutation.path(),
            mutation.id
        );
        items.push_back(mutation);

        if let Err(e) = self.persist(&items) {
            items.pop_back();
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot of pending mutations, oldest first
    pub async fn pending(&self) -> Vec<QueuedMutation> {
        self.items.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Deliver queued mutations in order until the queue is empty or one
    /// fails
    pub async fn replay(&self, sender: &dyn MutationSender) -> ReplayReport {
        let _pass = self.replay_lock.lock().await;
        let mut report = ReplayReport::default();

        loop {
            // The lock is not held across the send so new writes can still
            // be queued behind the head
            let head = self.items.lock().await.front().cloned();
            let Some(head) = head else {
                break;
            };

            match sender.send_mutation(&head).await {
                Ok(()) => {
                    let mut items = self.items.lock().await;
                    if items.front().map(|m| m.id) == Some(head.id) {
                        items.pop_front();
                    }
                    if let Err(e) = self.persist(&items) {
                        warn!("Failed to persist queue after replaying {}: {}", head.id, e);
                    }
                    report.replayed += 1;
                    debug!("Replayed {} {}", head.method(), head.path());
                }
                Err(e) => {
                    warn!(
                        "Replay of {} {} failed, stopping: {}",
                        head.method(),
                        head.path(),
                        e
                    );
                    report.halted = Some(e.to_string());
                    break;
                }
            }
        }

        report.remaining = self.items.lock().await.len();
        if report.replayed > 0 || report.halted.is_some() {
            info!(
                "Replay finished: {} delivered, {} remaining",
                report.replayed, report.remaining
            );
        }
        report
    }

    fn persist(&self, items: &VecDeque<QueuedMutation>) -> StorageResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        save_json(path, items)
    }
}
