//! Realtime channel
//!
//! A persistent, authenticated, event-named message channel to the
//! platform server, with handler registration that survives reconnects.

mod binding;
mod frame;
mod session;
mod transport;

pub use binding::{bind_to_auth, LogoutPolicy};
pub use frame::Frame;
pub use session::{
    Handler, HandlerId, LifecycleEvent, RealtimeSession, ReconnectPolicy, SessionStatus,
};
pub use transport::{Connector, DisconnectReason, Link, LinkSignal, WsConnector};
