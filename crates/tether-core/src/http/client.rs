//! Authenticated client
//!
//! Wraps a [`Transport`] with the platform's request policy:
//!
//! 1. Attach `Authorization: Bearer <access token>` to everything except
//!    the login and refresh endpoints.
//! 2. On a 401, refresh the access token once and resend the request once.
//!    Refreshes are single-flight: concurrent 401s wait for the refresh in
//!    progress and reuse its token.
//! 3. When no response arrives at all, reads fall back to the response
//!    cache and writes are handed to the offline queue. The caller still
//!    gets an error for a queued write.
//! 4. Successful reads populate the response cache; writes never do.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::request::{ApiRequest, ApiResponse, TransportResponse};
use super::transport::Transport;
use crate::auth::{Credential, TokenStore, User};
use crate::cache::{CacheKey, ResponseCache};
use crate::config::Config;
use crate::error::{ClientError, ClientResult, TransportError};
use crate::queue::{MutationSender, OfflineQueue, QueuedMutation};

const AUTHORIZATION: &str = "Authorization";
const CONTENT_TYPE: &str = "Content-Type";

/// Endpoint and timeout settings of the client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub login_path: String,
    pub refresh_path: String,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Config::default().into()
    }
}

impl From<Config> for ClientOptions {
    fn from(config: Config) -> Self {
        Self::from(&config)
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            login_path: config.login_path.clone(),
            refresh_path: config.refresh_path.clone(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// How a failed write is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Issued by a caller; queued when the network is down
    Interactive,
    /// Replayed from the queue; never queued again
    Replay,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(default)]
    success: bool,
    access_token: Option<String>,
    refresh_token: Option<String>,
    user: Option<User>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

pub struct AuthenticatedClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    cache: Arc<ResponseCache>,
    queue: Arc<OfflineQueue>,
    options: ClientOptions,
    /// Held for the duration of a refresh call
    refresh_lock: Mutex<()>,
}

impl AuthenticatedClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenStore>,
        cache: Arc<ResponseCache>,
        queue: Arc<OfflineQueue>,
        options: ClientOptions,
    ) -> Self {
        Self {
            transport,
            tokens,
            cache,
            queue,
            options,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Send a request through the full policy
    pub async fn send(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        self.dispatch(request, Delivery::Interactive).await
    }

    pub async fn get(&self, path: &str) -> ClientResult<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> ClientResult<ApiResponse> {
        self.send(ApiRequest::post(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> ClientResult<ApiResponse> {
        self.send(ApiRequest::put(path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> ClientResult<ApiResponse> {
        self.send(ApiRequest::patch(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Exchange email and password for a credential and store it
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<Credential> {
        let request = ApiRequest::post(&self.options.login_path)
            .json(json!({ "email": email, "password": password }));

        let response = self.send(request).await?;
        let body: LoginResponse = response.json()?;

        if !body.success {
            return Err(ClientError::LoginRejected {
                message: body
                    .message
                    .unwrap_or_else(|| "invalid credentials".to_string()),
            });
        }

        let (Some(access_token), Some(user)) = (body.access_token, body.user) else {
            return Err(ClientError::LoginRejected {
                message: "login response is missing the token or user".to_string(),
            });
        };

        let credential = Credential {
            access_token,
            refresh_token: body.refresh_token,
            user,
        };
        self.tokens.login(credential.clone()).await?;
        Ok(credential)
    }

    /// End the session: credentials and cached responses are dropped
    ///
    /// Queued writes are kept and replayed under the next session.
    pub async fn logout(&self) -> ClientResult<()> {
        self.tokens.clear().await?;
        self.cache.clear().await?;
        Ok(())
    }

    fn is_bootstrap(&self, request: &ApiRequest) -> bool {
        let path = request.bare_path().trim_start_matches('/');
        path == self.options.login_path.trim_start_matches('/')
            || path == self.options.refresh_path.trim_start_matches('/')
    }

    async fn dispatch(&self, mut request: ApiRequest, delivery: Delivery) -> ClientResult<ApiResponse> {
        let bootstrap = self.is_bootstrap(&request);

        // The transport writes the multipart boundary header itself
        if request.body.is_multipart() {
            request.remove_header(CONTENT_TYPE);
        }

        let mut used_token = None;
        if !bootstrap {
            if let Some(token) = self.tokens.access_token().await {
                set_bearer(&mut request, &token);
                used_token = Some(token);
            }
        }

        let mut retried = false;
        loop {
            let response = match self.execute(&request).await {
                Ok(response) => response,
                Err(error) if !error.is_network() => {
                    warn!("{} {} could not be sent: {}", request.method, request.path, error);
                    return Err(ClientError::InvalidRequest(error.to_string()));
                }
                Err(error) => return self.on_unavailable(request, error, bootstrap, delivery).await,
            };

            if response.status == 401 && !bootstrap && !retried {
                retried = true;
                debug!("401 from {} {}, refreshing", request.method, request.path);
                let token = self.refresh_after_unauthorized(used_token.as_deref()).await?;
                set_bearer(&mut request, &token);
                used_token = Some(token);
                continue;
            }

            return self.on_response(&request, response).await;
        }
    }

    /// Run one exchange under the request timeout
    async fn execute(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError> {
        let timeout = request.timeout.unwrap_or(self.options.request_timeout);
        match tokio::time::timeout(timeout, self.transport.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn on_response(
        &self,
        request: &ApiRequest,
        response: TransportResponse,
    ) -> ClientResult<ApiResponse> {
        let status = response.status;
        let body = response.json_body();

        if !response.is_success() {
            debug!("{} {} failed with {}", request.method, request.path, status);
            return Err(ClientError::Application { status, body });
        }

        if request.method.is_read() {
            let key = CacheKey::for_request(request);
            if let Err(e) = self.cache.set(key, status, body.clone()).await {
                warn!("Failed to persist cached response: {}", e);
            }
        }

        Ok(ApiResponse::live(status, body))
    }

    /// No response arrived: serve from cache or queue for replay
    async fn on_unavailable(
        &self,
        mut request: ApiRequest,
        error: TransportError,
        bootstrap: bool,
        delivery: Delivery,
    ) -> ClientResult<ApiResponse> {
        if request.method.is_read() {
            let key = CacheKey::for_request(&request);
            if let Some(hit) = self.cache.get(&key).await {
                warn!(
                    "{} unavailable ({}), serving cached response{}",
                    key,
                    error,
                    if hit.is_stale { " (stale)" } else { "" }
                );
                return Ok(ApiResponse {
                    status: hit.status,
                    body: hit.payload,
                    from_cache: true,
                    stale: hit.is_stale,
                });
            }
            return Err(ClientError::offline(error));
        }

        if bootstrap || delivery == Delivery::Replay {
            return Err(ClientError::offline(error));
        }

        // The bearer is re-attached at replay time; it is not persisted
        request.remove_header(AUTHORIZATION);
        let method = request.method;
        let path = request.path.clone();

        match self.queue.add(QueuedMutation::new(request)).await {
            Ok(()) => {
                warn!("{} {} failed ({}), queued for replay", method, path, error);
                Err(ClientError::TransportUnavailable {
                    source: error,
                    queued: true,
                })
            }
            Err(e) => {
                warn!("{} {} failed and could not be queued: {}", method, path, e);
                Err(ClientError::offline(error))
            }
        }
    }

    /// Obtain a usable access token after a 401
    ///
    /// `stale` is the token the failed request carried. If another task has
    /// already replaced it while this one waited for the lock, that token is
    /// reused and no second refresh call is made.
    async fn refresh_after_unauthorized(&self, stale: Option<&str>) -> ClientResult<String> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.tokens.access_token().await {
            if Some(current.as_str()) != stale {
                debug!("Access token already rotated, reusing it");
                return Ok(current);
            }
        }

        self.refresh().await
    }

    /// Call the refresh endpoint; any failure ends the session
    async fn refresh(&self) -> ClientResult<String> {
        let Some(refresh_token) = self.tokens.refresh_token().await else {
            return Err(self.expire("no refresh token available").await);
        };

        let request =
            ApiRequest::post(&self.options.refresh_path).json(json!({ "refreshToken": refresh_token }));

        let response = match self.execute(&request).await {
            Ok(response) => response,
            Err(e) => return Err(self.expire(format!("refresh request failed: {}", e)).await),
        };

        if !response.is_success() {
            return Err(self
                .expire(format!("refresh rejected with status {}", response.status))
                .await);
        }

        let body: RefreshResponse = match serde_json::from_slice(&response.body) {
            Ok(body) => body,
            Err(e) => return Err(self.expire(format!("malformed refresh response: {}", e)).await),
        };

        let access_token = match body.access_token {
            Some(token) if body.success => token,
            _ => return Err(self.expire("refresh was not successful").await),
        };

        if !self
            .tokens
            .update_tokens(access_token.clone(), body.refresh_token)
            .await?
        {
            return Err(ClientError::auth_expired("session ended during refresh"));
        }

        info!("Access token refreshed");
        Ok(access_token)
    }

    /// Terminal auth failure: wipe the session and build the error
    async fn expire(&self, reason: impl Into<String>) -> ClientError {
        let reason = reason.into();
        warn!("Session expired: {}", reason);

        if let Err(e) = self.tokens.clear().await {
            warn!("Failed to clear credentials: {}", e);
        }
        if let Err(e) = self.cache.clear().await {
            warn!("Failed to clear response cache: {}", e);
        }

        ClientError::AuthExpired { reason }
    }
}

fn set_bearer(request: &mut ApiRequest, token: &str) {
    request.remove_header(AUTHORIZATION);
    request
        .headers
        .insert(AUTHORIZATION.to_string(), format!("Bearer {}", token));
}

#[async_trait]
impl MutationSender for AuthenticatedClient {
    async fn send_mutation(&self, mutation: &QueuedMutation) -> ClientResult<()> {
        self.dispatch(mutation.request.clone(), Delivery::Replay)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MultipartPart;
    use crate::storage::MemoryStore;
    use crate::testing::{sample_user, ScriptedTransport};
    use chrono::Utc;

    struct Fixture {
        transport: Arc<ScriptedTransport>,
        tokens: Arc<TokenStore>,
        cache: Arc<ResponseCache>,
        queue: Arc<OfflineQueue>,
        client: AuthenticatedClient,
    }

    async fn fixture(access: Option<&str>, refresh: Option<&str>) -> Fixture {
        let transport = Arc::new(ScriptedTransport::new());
        let tokens = Arc::new(TokenStore::new(Arc::new(MemoryStore::new())));
        if let Some(access) = access {
            tokens
                .login(Credential {
                    access_token: access.to_string(),
                    refresh_token: refresh.map(str::to_string),
                    user: sample_user(),
                })
                .await
                .unwrap();
        }
        let cache = Arc::new(ResponseCache::in_memory(Duration::from_secs(300)));
        let queue = Arc::new(OfflineQueue::in_memory());
        let client = AuthenticatedClient::new(
            transport.clone(),
            tokens.clone(),
            cache.clone(),
            queue.clone(),
            ClientOptions::default(),
        );
        Fixture {
            transport,
            tokens,
            cache,
            queue,
            client,
        }
    }

    #[tokio::test]
    async fn test_bearer_attached_to_regular_requests() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/children", 200, json!([]));

        f.client.get("/children").await.unwrap();

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header_value("authorization"), Some("Bearer a1"));
    }

    #[tokio::test]
    async fn test_bootstrap_endpoints_skip_bearer() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond(
            "POST",
            "/auth/login",
            200,
            json!({
                "success": true,
                "accessToken": "a2",
                "refreshToken": "r2",
                "user": {"id": 1, "email": "parent@school.test"}
            }),
        );

        let credential = f.client.login("parent@school.test", "secret").await.unwrap();

        assert_eq!(credential.access_token, "a2");
        assert_eq!(f.tokens.refresh_token().await.as_deref(), Some("r2"));
        let sent = f.transport.requests();
        assert_eq!(sent[0].header_value("authorization"), None);
    }

    #[tokio::test]
    async fn test_bootstrap_match_ignores_leading_slash() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("POST", "auth/refresh", 401, json!({}));

        let err = f
            .client
            .send(ApiRequest::post("auth/refresh").json(json!({"refreshToken": "r1"})))
            .await
            .unwrap_err();

        // No bearer and no refresh-on-401 for the refresh endpoint itself
        assert_eq!(err.status(), Some(401));
        let sent = f.transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header_value("authorization"), None);
        assert!(f.tokens.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let f = fixture(None, None).await;
        f.transport.respond(
            "POST",
            "/auth/login",
            200,
            json!({"success": false, "message": "Wrong password"}),
        );

        let err = f.client.login("parent@school.test", "nope").await.unwrap_err();
        assert!(matches!(err, ClientError::LoginRejected { ref message } if message == "Wrong password"));
        assert!(!f.tokens.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_login_offline_is_not_queued() {
        let f = fixture(None, None).await;
        f.transport.fail("POST", "/auth/login", TransportError::Timeout);

        let err = f.client.login("parent@school.test", "secret").await.unwrap_err();
        assert!(err.is_offline());
        assert!(!err.is_queued());
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_401_refreshes_once_and_retries() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond_when_bearer("GET", "/meals", "a1", 401, json!({}));
        f.transport.respond_when_bearer("GET", "/meals", "a2", 200, json!(["soup"]));
        f.transport.respond(
            "POST",
            "/auth/refresh",
            200,
            json!({"success": true, "accessToken": "a2"}),
        );

        let response = f.client.get("/meals").await.unwrap();

        assert_eq!(response.body, json!(["soup"]));
        assert_eq!(f.transport.count("POST", "/auth/refresh"), 1);
        assert_eq!(f.transport.count("GET", "/meals"), 2);
        assert_eq!(f.tokens.access_token().await.as_deref(), Some("a2"));
        // Refresh without a new refresh token keeps the old one
        assert_eq!(f.tokens.refresh_token().await.as_deref(), Some("r1"));

        let refresh_call = f
            .transport
            .requests()
            .into_iter()
            .find(|r| r.path == "/auth/refresh")
            .unwrap();
        assert_eq!(refresh_call.header_value("authorization"), None);
        assert_eq!(
            refresh_call.body,
            crate::http::RequestBody::Json(json!({"refreshToken": "r1"}))
        );
    }

    #[tokio::test]
    async fn test_second_401_is_not_retried() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/reports", 401, json!({"message": "forbidden"}));
        f.transport.respond(
            "POST",
            "/auth/refresh",
            200,
            json!({"success": true, "accessToken": "a2", "refreshToken": "r2"}),
        );

        let err = f.client.get("/reports").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(f.transport.count("POST", "/auth/refresh"), 1);
        assert_eq!(f.transport.count("GET", "/reports"), 2);
        // The session itself is still valid
        assert!(f.tokens.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_expires_session() {
        let f = fixture(Some("a1"), None).await;
        f.transport.respond("GET", "/meals", 401, json!({}));
        f.cache
            .set(CacheKey::new("/old", &[]), 200, json!("x"))
            .await
            .unwrap();

        let err = f.client.get("/meals").await.unwrap_err();

        assert!(err.is_auth_expired());
        assert!(!f.tokens.is_authenticated().await);
        assert!(f.cache.is_empty().await);
        assert_eq!(f.transport.count("POST", "/auth/refresh"), 0);
        assert_eq!(f.transport.count("GET", "/meals"), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_expires_session() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/meals", 401, json!({}));
        f.transport.respond("POST", "/auth/refresh", 401, json!({"success": false}));

        let err = f.client.get("/meals").await.unwrap_err();

        assert!(err.is_auth_expired());
        assert!(f.tokens.credential().await.is_none());
        assert_eq!(f.transport.count("GET", "/meals"), 1);
    }

    #[tokio::test]
    async fn test_unsuccessful_refresh_body_expires_session() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/meals", 401, json!({}));
        f.transport.respond("POST", "/auth/refresh", 200, json!({"success": false}));

        let err = f.client.get("/meals").await.unwrap_err();
        assert!(err.is_auth_expired());
        assert!(!f.tokens.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_expires_session() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/meals", 401, json!({}));
        f.transport.fail("POST", "/auth/refresh", TransportError::Connect("down".into()));

        let err = f.client.get("/meals").await.unwrap_err();
        assert!(err.is_auth_expired());
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond_when_bearer("GET", "/meals", "a1", 401, json!({}));
        f.transport.respond_when_bearer("GET", "/meals", "a2", 200, json!("meals"));
        f.transport.respond_when_bearer("GET", "/activities", "a1", 401, json!({}));
        f.transport.respond_when_bearer("GET", "/activities", "a2", 200, json!("activities"));
        f.transport.respond(
            "POST",
            "/auth/refresh",
            200,
            json!({"success": true, "accessToken": "a2"}),
        );
        f.transport
            .delay("POST", "/auth/refresh", Duration::from_millis(50));

        let (meals, activities) =
            tokio::join!(f.client.get("/meals"), f.client.get("/activities"));

        assert_eq!(meals.unwrap().body, json!("meals"));
        assert_eq!(activities.unwrap().body, json!("activities"));
        assert_eq!(f.transport.count("POST", "/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_successful_read_is_cached() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/activities", 200, json!([{"id": 9}]));

        f.client
            .send(ApiRequest::get("/activities").query("week", "3"))
            .await
            .unwrap();

        let key = CacheKey::new("/activities", &[("week".into(), "3".into())]);
        assert_eq!(f.cache.get(&key).await.unwrap().payload, json!([{"id": 9}]));
    }

    #[tokio::test]
    async fn test_writes_and_errors_are_not_cached() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("POST", "/activities", 201, json!({"id": 1}));
        f.transport.respond("GET", "/missing", 404, json!({"message": "nope"}));

        f.client.post("/activities", json!({"name": "Art"})).await.unwrap();
        let err = f.client.get("/missing").await.unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(err.server_message(), Some("nope"));
        assert!(f.cache.is_empty().await);
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_read_served_from_cache() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/children", 200, json!(["Ada"]));
        f.client.get("/children").await.unwrap();

        f.transport.fail("GET", "/children", TransportError::Connect("offline".into()));
        let response = f.client.get("/children").await.unwrap();

        assert!(response.from_cache);
        assert!(!response.stale);
        assert_eq!(response.body, json!(["Ada"]));
    }

    #[tokio::test]
    async fn test_offline_read_marks_stale_entries() {
        let f = fixture(Some("a1"), Some("r1")).await;
        let client = AuthenticatedClient::new(
            f.transport.clone(),
            f.tokens.clone(),
            Arc::new(ResponseCache::in_memory(Duration::ZERO)),
            f.queue.clone(),
            ClientOptions::default(),
        );
        f.transport.respond("GET", "/children", 200, json!(["Ada"]));
        client.get("/children").await.unwrap();
        let stored_at = client
            .cache()
            .get(&CacheKey::new("/children", &[]))
            .await
            .unwrap()
            .stored_at;

        // Make sure some time has passed since the entry was stored
        while Utc::now() <= stored_at {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        f.transport.fail("GET", "/children", TransportError::Timeout);
        let response = client.get("/children").await.unwrap();
        assert!(response.from_cache);
        assert!(response.stale);
    }

    #[tokio::test]
    async fn test_offline_read_without_cache_fails() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.fail("GET", "/children", TransportError::Timeout);

        let err = f.client.get("/children").await.unwrap_err();
        assert!(err.is_offline());
        assert!(!err.is_queued());
        assert!(f.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_write_is_queued_and_rejected() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.fail("PATCH", "/meals/1", TransportError::Connect("offline".into()));

        let err = f
            .client
            .patch("/meals/1", json!({"menu": "rice"}))
            .await
            .unwrap_err();

        assert!(err.is_queued());
        let pending = f.queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.path, "/meals/1");
        assert_eq!(pending[0].request.body, crate::http::RequestBody::Json(json!({"menu": "rice"})));
        // The bearer is not persisted with the queued request
        assert_eq!(pending[0].request.header_value("authorization"), None);
    }

    #[tokio::test]
    async fn test_replay_does_not_requeue() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.fail("DELETE", "/media/3", TransportError::Timeout);
        let _ = f.client.delete("/media/3").await;
        assert_eq!(f.queue.len().await, 1);

        let report = f.queue.replay(&f.client).await;
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 1);
        assert_eq!(f.queue.len().await, 1);

        f.transport.respond("DELETE", "/media/3", 204, Value::Null);
        let report = f.queue.replay(&f.client).await;
        assert_eq!(report.replayed, 1);
        assert!(f.queue.is_empty().await);

        // Replay re-attached the current bearer
        let last = f.transport.requests().pop().unwrap();
        assert_eq!(last.header_value("authorization"), Some("Bearer a1"));
    }

    #[tokio::test]
    async fn test_multipart_drops_caller_content_type() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("POST", "/media", 201, json!({}));

        let request = ApiRequest::post("/media")
            .header("Content-Type", "multipart/form-data")
            .multipart(vec![MultipartPart::file(
                "photo",
                "a.jpg",
                Some("image/jpeg".into()),
                vec![1],
            )]);
        f.client.send(request).await.unwrap();

        let sent = f.transport.requests();
        assert_eq!(sent[0].header_value("content-type"), None);
        assert_eq!(sent[0].header_value("authorization"), Some("Bearer a1"));
    }

    #[tokio::test]
    async fn test_unbuildable_write_is_rejected_not_queued() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.fail(
            "POST",
            "/media",
            TransportError::Malformed("bad part type".into()),
        );
        f.transport.fail("POST", "/activities", TransportError::Connect("offline".into()));

        let err = f
            .client
            .send(ApiRequest::post("/media").multipart(vec![MultipartPart::file(
                "photo",
                "a.jpg",
                Some("not a mime".into()),
                vec![1],
            )]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
        assert!(!err.is_queued());

        // A write that really failed offline is still queued, and nothing
        // sits in front of it
        let err = f
            .client
            .post("/activities", json!({"title": "Painting"}))
            .await
            .unwrap_err();
        assert!(err.is_queued());
        assert_eq!(f.queue.len().await, 1);

        f.transport.respond("POST", "/activities", 201, json!({"id": 4}));
        let report = f.queue.replay(&f.client).await;
        assert_eq!(report.replayed, 1);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_unbuildable_read_skips_cache() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/children", 200, json!([{"id": 1}]));
        f.client.get("/children").await.unwrap();

        f.transport.fail(
            "GET",
            "/children",
            TransportError::Malformed("invalid header".into()),
        );
        let err = f.client.get("/children").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_client_timeout_applies() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/slow", 200, json!({}));
        f.transport.delay("GET", "/slow", Duration::from_millis(200));

        let err = f
            .client
            .send(ApiRequest::get("/slow").timeout(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::TransportUnavailable {
                source: TransportError::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_credentials_and_cache() {
        let f = fixture(Some("a1"), Some("r1")).await;
        f.transport.respond("GET", "/children", 200, json!([]));
        f.client.get("/children").await.unwrap();

        f.client.logout().await.unwrap();

        assert!(!f.tokens.is_authenticated().await);
        assert!(f.cache.get(&CacheKey::new("/children", &[])).await.is_none());
    }
}
