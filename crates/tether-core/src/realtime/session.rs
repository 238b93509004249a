//! Realtime session
//!
//! Owns at most one live connection and the registry of event handlers.
//! Handlers are registered once and survive reconnects: every new
//! connection gets its own listener table, copied from the registry before
//! the session reports `Connected`. The old table is discarded with the
//! old connection, so no handler ever fires twice for one event.
//!
//! Connections are driven by a background task. A transport loss is
//! retried with capped exponential backoff up to a fixed number of
//! attempts; a close initiated by the server schedules exactly one
//! reconnect attempt after a short delay.
//!
//! Emitting while not connected drops the event with a warning. Nothing is
//! buffered for later delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::Frame;
use super::transport::{Connector, DisconnectReason, Link, LinkSignal};

/// Event handler; receives the frame payload
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connected,
    /// An attempt to open a connection failed
    ConnectError(String),
    Disconnected(DisconnectReason),
    /// A non-fatal channel error
    Error(String),
    /// Automatic reconnection gave up
    ReconnectExhausted,
}

/// Reconnection limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after a transport loss before giving up
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Wait before the single reconnect after a server-side close
    pub server_restart_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            server_restart_delay: Duration::from_millis(3000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

type Listeners = HashMap<String, Vec<(HandlerId, Handler)>>;

/// The connection currently in use
struct LiveHandle {
    listeners: Listeners,
    outgoing: tokio::sync::mpsc::UnboundedSender<Frame>,
}

struct SessionState {
    /// Bumped whenever a driver is started or torn down; a driver whose
    /// generation is no longer current must not touch the state
    generation: u64,
    live: Option<LiveHandle>,
}

struct Shared {
    state: Mutex<SessionState>,
    /// Registrations that outlive individual connections
    registry: Mutex<Listeners>,
    status: watch::Sender<SessionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    next_handler: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn notify(&self, event: LifecycleEvent) {
        let _ = self.lifecycle.send(event);
    }

    /// Update the status on behalf of driver `generation`
    ///
    /// Returns false when that driver has been superseded.
    fn set_status(&self, generation: u64, status: SessionStatus) -> bool {
        let state = lock(&self.state);
        if state.generation != generation {
            return false;
        }
        self.status.send_replace(status);
        true
    }
}

pub struct RealtimeSession {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSession {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (status, _) = watch::channel(SessionStatus::Disconnected);
        let (lifecycle, _) = broadcast::channel(64);

        Self {
            connector,
            policy,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState {
                    generation: 0,
                    live: None,
                }),
                registry: Mutex::new(HashMap::new()),
                status,
                lifecycle,
                next_handler: AtomicU64::new(1),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.lifecycle.subscribe()
    }

    /// Open a connection authenticated with `token`
    ///
    /// Does nothing while connected. The token is bound to this connection
    /// and its automatic reconnects; use [`reconnect`](Self::reconnect) to
    /// switch tokens. Must be called within a Tokio runtime.
    pub fn connect(&self, token: &str) {
        let mut driver = lock(&self.driver);

        let generation = {
            let mut state = lock(&self.shared.state);
            if state.live.is_some() {
                debug!("Realtime session already connected");
                return;
            }
            state.generation += 1;
            self.shared.status.send_replace(SessionStatus::Connecting);
            state.generation
        };

        if let Some(previous) = driver.take() {
            previous.abort();
        }

        let context = DriverContext {
            connector: self.connector.clone(),
            policy: self.policy.clone(),
            shared: self.shared.clone(),
            token: token.to_string(),
            generation,
        };
        *driver = Some(tokio::spawn(context.run()));
    }

    /// Drop any current connection and connect with `token`
    pub fn reconnect(&self, token: &str) {
        self.teardown();
        self.connect(token);
    }

    /// Close the connection and stop reconnecting
    ///
    /// Registered handlers are kept for the next connection.
    pub fn disconnect(&self) {
        if self.teardown() {
            info!("Realtime session disconnected");
            self.shared
                .notify(LifecycleEvent::Disconnected(DisconnectReason::ClientTeardown));
        }
    }

    /// Disconnect and forget every registered handler
    pub fn disconnect_and_clear(&self) {
        self.disconnect();
        lock(&self.shared.registry).clear();
    }

    /// Returns whether there was anything to tear down
    fn teardown(&self) -> bool {
        let driver = lock(&self.driver).take();
        let was_active = {
            let mut state = lock(&self.shared.state);
            state.generation += 1;
            // Dropping the handle drops the outgoing sender, which closes
            // the connection
            let had_live = state.live.take().is_some();
            let previous = self.shared.status.send_replace(SessionStatus::Disconnected);
            had_live || previous != SessionStatus::Disconnected
        };

        if let Some(driver) = driver {
            driver.abort();
        }
        was_active
    }

    /// Register `handler` for `event`
    ///
    /// The handler is attached to the live connection, if any, and to every
    /// future one.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(handler);

        let mut state = lock(&self.shared.state);
        lock(&self.shared.registry)
            .entry(event.to_string())
            .or_default()
            .push((id, handler.clone()));
        if let Some(live) = state.live.as_mut() {
            live.listeners
                .entry(event.to_string())
                .or_default()
                .push((id, handler));
        }

        id
    }

    /// Remove one registration; returns whether it existed
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut state = lock(&self.shared.state);
        let removed = remove_handler(&mut lock(&self.shared.registry), event, id);
        if let Some(live) = state.live.as_mut() {
            remove_handler(&mut live.listeners, event, id);
        }
        removed
    }

    /// Remove every registration for `event`
    pub fn off_all(&self, event: &str) {
        let mut state = lock(&self.shared.state);
        lock(&self.shared.registry).remove(event);
        if let Some(live) = state.live.as_mut() {
            live.listeners.remove(event);
        }
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.shared.registry)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Send an event on the live connection
    ///
    /// Returns false, and logs a warning, when there is no live connection.
    /// The event is not kept for later.
    pub fn emit(&self, event: &str, data: Value) -> bool {
        let state = lock(&self.shared.state);
        match state.live.as_ref() {
            Some(live) => live.outgoing.send(Frame::new(event, data)).is_ok(),
            None => {
                warn!("Realtime session not connected, dropping '{}'", event);
                false
            }
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn remove_handler(listeners: &mut Listeners, event: &str, id: HandlerId) -> bool {
    let Some(handlers) = listeners.get_mut(event) else {
        return false;
    };
    let before = handlers.len();
    handlers.retain(|(existing, _)| *existing != id);
    let removed = handlers.len() != before;
    if handlers.is_empty() {
        listeners.remove(event);
    }
    removed
}

/// Everything one background driver needs
struct DriverContext {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    token: String,
    generation: u64,
}

impl DriverContext {
    async fn run(self) {
        let mut attempt: u32 = 0;
        // Set while waiting on the single reconnect after a server close
        let mut scheduled = false;

        loop {
            if !self.shared.set_status(self.generation, SessionStatus::Connecting) {
                return;
            }

            match self.connector.open(&self.token).await {
                Ok(link) => {
                    attempt = 0;
                    scheduled = false;

                    let Some(reason) = self.run_link(link).await else {
                        return;
                    };
                    if !self.shared.set_status(self.generation, SessionStatus::Disconnected) {
                        return;
                    }
                    info!("Realtime connection ended: {}", reason);
                    self.shared
                        .notify(LifecycleEvent::Disconnected(reason.clone()));

                    match reason {
                        DisconnectReason::ServerTerminated => {
                            scheduled = true;
                            debug!(
                                "Reconnecting once in {:?}",
                                self.policy.server_restart_delay
                            );
                            tokio::time::sleep(self.policy.server_restart_delay).await;
                            continue;
                        }
                        DisconnectReason::ClientTeardown => return,
                        _ => {}
                    }
                }
                Err(e) => {
                    warn!("Realtime connect failed: {}", e);
                    if !self.shared.set_status(self.generation, SessionStatus::Disconnected) {
                        return;
                    }
                    self.shared.notify(LifecycleEvent::ConnectError(e.to_string()));

                    if scheduled {
                        info!("Scheduled realtime reconnect failed, staying disconnected");
                        return;
                    }
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                warn!(
                    "Giving up on realtime after {} reconnect attempts",
                    self.policy.max_attempts
                );
                self.shared.notify(LifecycleEvent::ReconnectExhausted);
                return;
            }

            let delay = self.policy.delay_for(attempt);
            debug!("Realtime reconnect attempt {} in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Serve one connection until it ends
    ///
    /// Returns `None` when this driver was superseded meanwhile.
    async fn run_link(&self, link: Link) -> Option<DisconnectReason> {
        let Link {
            outgoing,
            mut incoming,
        } = link;

        {
            let mut state = lock(&self.shared.state);
            if state.generation != self.generation {
                return None;
            }
            let listeners = lock(&self.shared.registry).clone();
            state.live = Some(LiveHandle {
                listeners,
                outgoing,
            });
            self.shared.status.send_replace(SessionStatus::Connected);
        }
        info!("Realtime session connected");
        self.shared.notify(LifecycleEvent::Connected);

        let reason = loop {
            match incoming.recv().await {
                Some(LinkSignal::Event(frame)) => self.dispatch(&frame),
                Some(LinkSignal::Error(message)) => {
                    self.shared.notify(LifecycleEvent::Error(message));
                }
                Some(LinkSignal::Closed(reason)) => break reason,
                None => break DisconnectReason::TransportClosed,
            }
        };

        let mut state = lock(&self.shared.state);
        if state.generation != self.generation {
            return None;
        }
        state.live = None;
        Some(reason)
    }

    fn dispatch(&self, frame: &Frame) {
        // Handlers run without the lock held so they may call back into
        // the session
        let handlers: Vec<Handler> = {
            let state = lock(&self.shared.state);
            if state.generation != self.generation {
                return;
            }
            state
                .live
                .as_ref()
                .and_then(|live| live.listeners.get(&frame.event))
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!("No handler for realtime event '{}'", frame.event);
        }
        for handler in handlers {
            handler(&frame.data);
        }
    }
}
