//! Credential state
//!
//! [`TokenStore`] is the single owner of the signed-in credential. Every
//! outgoing request reads from it; only login, refresh and logout write to
//! it. The access/refresh pair is swapped under one write lock, so a reader
//! never sees a new access token next to a stale refresh token.
//!
//! State transitions are broadcast as [`AuthChange`] so collaborators (the
//! realtime session in particular) can follow login and logout without
//! polling.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::storage::{SecureStore, StorageResult};

/// Secure-store key of the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Secure-store key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Secure-store key of the serialized user record
pub const USER_KEY: &str = "user";

/// The signed-in user as returned by the login endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Fields this layer does not interpret, kept for the UI
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Best human-readable label for the user
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| match &self.id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

/// Access token, refresh token and user, as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user: User,
}

/// Credential state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
    /// A new session started
    LoggedIn { access_token: String },
    /// The access token was rotated within the same session
    Refreshed { access_token: String },
    /// The session ended (logout or terminal auth failure)
    LoggedOut,
}

/// Process-wide credential holder
pub struct TokenStore {
    store: Arc<dyn SecureStore>,
    state: RwLock<Option<Credential>>,
    changes: broadcast::Sender<AuthChange>,
}

impl TokenStore {
    /// Create a signed-out token store backed by `store`
    pub fn new(store: Arc<dyn SecureStore>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            store,
            state: RwLock::new(None),
            changes,
        }
    }

    /// Restore the credential persisted by a previous process
    ///
    /// Inconsistent leftovers (an access token without a readable user
    /// record, or a refresh token on its own) are wiped.
    pub async fn load(store: Arc<dyn SecureStore>) -> StorageResult<Self> {
        let access = store.get(ACCESS_TOKEN_KEY).await?;
        let refresh = store.get(REFRESH_TOKEN_KEY).await?;
        let user = store.get(USER_KEY).await?;

        let user = user.and_then(|raw| match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Stored user record is unreadable: {}", e);
                None
            }
        });

        let credential = match (access, user) {
            (Some(access_token), Some(user)) => Some(Credential {
                access_token,
                refresh_token: refresh,
                user,
            }),
            (None, None) if refresh.is_none() => None,
            _ => {
                warn!("Discarding partially stored credential");
                store
                    .remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY])
                    .await?;
                None
            }
        };

        let token_store = Self::new(store);
        *token_store.state.write().await = credential;
        Ok(token_store)
    }

    /// Subscribe to credential transitions
    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }

    /// Store a fresh credential after a successful login
    pub async fn login(&self, credential: Credential) -> StorageResult<()> {
        let user_json = serde_json::to_string(&credential.user)?;

        let mut state = self.state.write().await;
        match &credential.refresh_token {
            Some(refresh) => {
                self.store
                    .set_many(&[
                        (ACCESS_TOKEN_KEY, credential.access_token.as_str()),
                        (REFRESH_TOKEN_KEY, refresh.as_str()),
                        (USER_KEY, user_json.as_str()),
                    ])
                    .await?;
            }
            None => {
                self.store
                    .set_many(&[
                        (ACCESS_TOKEN_KEY, credential.access_token.as_str()),
                        (USER_KEY, user_json.as_str()),
                    ])
                    .await?;
                self.store.remove(REFRESH_TOKEN_KEY).await?;
            }
        }

        let access_token = credential.access_token.clone();
        info!("Signed in as {}", credential.user.display_name());
        *state = Some(credential);
        drop(state);

        let _ = self.changes.send(AuthChange::LoggedIn { access_token });
        Ok(())
    }

    /// Rotate the access token, and the refresh token when one is supplied
    ///
    /// Returns `false` if there is no session to update (it ended while the
    /// refresh was in flight).
    pub async fn update_tokens(
        &self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let Some(current) = state.as_mut() else {
            return Ok(false);
        };

        match &refresh_token {
            Some(refresh) => {
                self.store
                    .set_many(&[
                        (ACCESS_TOKEN_KEY, access_token.as_str()),
                        (REFRESH_TOKEN_KEY, refresh.as_str()),
                    ])
                    .await?
            }
            None => self.store.set(ACCESS_TOKEN_KEY, &access_token).await?,
        }

        current.access_token = access_token.clone();
        if refresh_token.is_some() {
            current.refresh_token = refresh_token;
        }
        drop(state);

        let _ = self.changes.send(AuthChange::Refreshed { access_token });
        Ok(true)
    }

    /// Drop the credential entirely
    pub async fn clear(&self) -> StorageResult<()> {
        let mut state = self.state.write().await;
        self.store
            .remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY])
            .await?;
        let was_signed_in = state.take().is_some();
        drop(state);

        if was_signed_in {
            info!("Signed out");
            let _ = self.changes.send(AuthChange::LoggedOut);
        }
        Ok(())
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.state.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
    }

    pub async fn user(&self) -> Option<User> {
        self.state.read().await.as_ref().map(|c| c.user.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_some()
    }
}
