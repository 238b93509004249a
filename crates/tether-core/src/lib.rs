//! Tether Core Library
//!
//! The network resilience layer of the school platform's client: every
//! request to the platform API and the realtime channel goes through here.
//!
//! # Architecture
//!
//! - **TokenStore**: single owner of the signed-in credential
//! - **AuthenticatedClient**: bearer injection, single-flight token refresh,
//!   cache fallback for reads and queuing for writes when offline
//! - **ResponseCache**: last good response per request, soft TTL
//! - **OfflineQueue**: durable FIFO of writes, replayed in order
//! - **ConnectivityMonitor**: network indicator, replay on reconnect
//! - **RealtimeSession**: event channel with handlers that survive
//!   reconnects
//!
//! # Quick Start
//!
//! ```text
//! let network = Network::open().await?;
//! network.client.login("parent@school.test", "secret").await?;
//!
//! let activities = network.client.get("/activities").await?;
//! if activities.stale {
//!     // served from cache while offline, older than the freshness window
//! }
//! ```
//!
//! # Modules
//!
//! - `network`: wiring of all components (main entry point)
//! - `auth`: credential state and transitions
//! - `http`: request model, transport seam, authenticated client
//! - `cache`: response cache
//! - `queue`: offline mutation queue
//! - `connectivity`: network indicator and replay trigger
//! - `realtime`: realtime session
//! - `storage`: secure store and atomic JSON persistence
//! - `config`: application configuration

pub mod auth;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod http;
pub mod network;
pub mod queue;
pub mod realtime;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthChange, Credential, TokenStore, User};
pub use cache::{CacheKey, CachedPayload, ResponseCache};
pub use config::Config;
pub use connectivity::{spawn_probe, ConnectivityMonitor, NetworkIndicator};
pub use error::{ClientError, ClientResult, RealtimeError, TransportError};
pub use http::{ApiRequest, ApiResponse, AuthenticatedClient, Method, MultipartPart};
pub use network::Network;
pub use queue::{MutationSender, OfflineQueue, QueuedMutation, ReplayReport};
pub use realtime::{LifecycleEvent, RealtimeSession, SessionStatus};
pub use storage::StorageError;
