//! Error taxonomy
//!
//! - [`TransportError`]: the request produced no response at all, either
//!   because the network failed or because it could not be built
//! - [`ClientError`]: what a caller of the authenticated client sees
//! - [`RealtimeError`]: failures of the realtime channel

use thiserror::Error;

use crate::storage::StorageError;

/// A request that never got a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport failure: {0}")]
    Other(String),

    /// The request could not be built and was never sent; resending it
    /// later fails the same way
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the failure says anything about connectivity
    pub fn is_network(&self) -> bool {
        !matches!(self, TransportError::Malformed(_))
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// The session is over; the user has to sign in again
    #[error("Authentication expired: {reason}")]
    AuthExpired { reason: String },

    /// No response was received; `queued` is true when the write was handed
    /// to the offline queue for background delivery
    #[error("Network unavailable{}: {source}", queued_note(.queued))]
    TransportUnavailable {
        #[source]
        source: TransportError,
        queued: bool,
    },

    /// The server answered with a non-2xx status
    #[error("Request failed with status {status}")]
    Application { status: u16, body: serde_json::Value },

    /// The login endpoint answered but refused the credentials
    #[error("Login rejected: {message}")]
    LoginRejected { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    pub fn offline(source: TransportError) -> Self {
        ClientError::TransportUnavailable {
            source,
            queued: false,
        }
    }

    pub fn auth_expired(reason: impl Into<String>) -> Self {
        ClientError::AuthExpired {
            reason: reason.into(),
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClientError::AuthExpired { .. })
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, ClientError::TransportUnavailable { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, ClientError::TransportUnavailable { queued: true, .. })
    }

    /// HTTP status of an application error
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Application { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-provided error message, if the body carries one
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Application { body, .. } => body
                .get("message")
                .or_else(|| body.get("error"))
                .and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

fn queued_note(queued: &bool) -> &'static str {
    if *queued {
        " (queued for replay)"
    } else {
        ""
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("realtime connection failed: {0}")]
    Connect(String),

    #[error("realtime handshake rejected: {0}")]
    Handshake(String),

    #[error("failed to encode realtime frame: {0}")]
    Encode(String),

    #[error("failed to decode realtime frame: {0}")]
    Decode(String),
}
