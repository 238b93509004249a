//! Ties the realtime session to the signed-in state
//!
//! The session connects when a user signs in and disconnects when the
//! session ends. Token refreshes do not touch a live connection; the token
//! of the current connection stays bound until the next sign-in.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::session::RealtimeSession;
use crate::auth::{AuthChange, TokenStore};

/// What happens to registered handlers at logout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogoutPolicy {
    /// Keep handlers for the next user
    #[default]
    KeepHandlers,
    /// Forget every handler
    ClearHandlers,
}

/// Follow `tokens` for the lifetime of the returned task
///
/// Connects right away if a user is already signed in.
pub async fn bind_to_auth(
    tokens: &TokenStore,
    session: Arc<RealtimeSession>,
    on_logout: LogoutPolicy,
) -> JoinHandle<()> {
    // Subscribe before reading the token so no transition is missed
    let mut changes = tokens.subscribe();
    if let Some(token) = tokens.access_token().await {
        session.connect(&token);
    }

    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(AuthChange::LoggedIn { access_token }) => {
                    debug!("Signed in, opening realtime session");
                    session.reconnect(&access_token);
                }
                Ok(AuthChange::LoggedOut) => {
                    debug!("Signed out, closing realtime session");
                    match on_logout {
                        LogoutPolicy::KeepHandlers => session.disconnect(),
                        LogoutPolicy::ClearHandlers => session.disconnect_and_clear(),
                    }
                }
                Ok(AuthChange::Refreshed { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} auth change(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
