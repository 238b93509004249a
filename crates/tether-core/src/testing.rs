//! Test doubles shared by the unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::auth::User;
use crate::error::{RealtimeError, TransportError};
use crate::http::{ApiRequest, Transport, TransportResponse};
use crate::realtime::{Connector, DisconnectReason, Frame, Link, LinkSignal};

pub fn sample_user() -> User {
    serde_json::from_value(json!({
        "id": 7,
        "email": "rivera@school.test",
        "name": "Ms. Rivera",
        "role": "staff",
        "schoolId": 3
    }))
    .unwrap()
}

#[derive(Clone)]
enum Outcome {
    Respond(u16, Value),
    Fail(TransportError),
}

/// (method, path, bearer token the rule is limited to)
type RuleKey = (String, String, Option<String>);

/// Transport answering from a table of rules
///
/// Rules limited to a bearer token win over general ones; a later rule for
/// the same key replaces the earlier one. Unmatched requests get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    rules: Mutex<HashMap<RuleKey, Outcome>>,
    delays: Mutex<HashMap<(String, String), Duration>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(method: &str, path: &str, bearer: Option<&str>) -> RuleKey {
        (method.to_string(), path.to_string(), bearer.map(str::to_string))
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: Value) {
        self.rules
            .lock()
            .unwrap()
            .insert(Self::key(method, path, None), Outcome::Respond(status, body));
    }

    pub fn respond_when_bearer(&self, method: &str, path: &str, token: &str, status: u16, body: Value) {
        self.rules.lock().unwrap().insert(
            Self::key(method, path, Some(token)),
            Outcome::Respond(status, body),
        );
    }

    pub fn fail(&self, method: &str, path: &str, error: TransportError) {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|(m, p, _), _| !(m == method && p == path));
        rules.insert(Self::key(method, path, None), Outcome::Fail(error));
    }

    pub fn delay(&self, method: &str, path: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), delay);
    }

    /// Every request seen, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == method && r.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError> {
        self.log.lock().unwrap().push(request.clone());

        let method = request.method.as_str().to_string();
        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&(method.clone(), request.path.clone()))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let bearer = request
            .header_value("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let outcome = {
            let rules = self.rules.lock().unwrap();
            bearer
                .and_then(|token| {
                    rules
                        .get(&(method.clone(), request.path.clone(), Some(token)))
                        .cloned()
                })
                .or_else(|| rules.get(&(method, request.path.clone(), None)).cloned())
        };

        match outcome {
            Some(Outcome::Respond(status, body)) => Ok(TransportResponse {
                status,
                body: if body.is_null() {
                    Vec::new()
                } else {
                    serde_json::to_vec(&body).unwrap()
                },
            }),
            Some(Outcome::Fail(error)) => Err(error),
            None => Ok(TransportResponse {
                status: 404,
                body: Vec::new(),
            }),
        }
    }
}

/// Server side of one fake realtime connection
pub struct FakeRemote {
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    pub to_client: mpsc::UnboundedSender<LinkSignal>,
}

impl FakeRemote {
    /// Deliver an event to the session
    pub fn push(&self, event: &str, data: Value) {
        let _ = self.to_client.send(LinkSignal::Event(Frame::new(event, data)));
    }

    /// End the connection
    pub fn close(&self, reason: DisconnectReason) {
        let _ = self.to_client.send(LinkSignal::Closed(reason));
    }

    /// Next frame the session emitted; `None` once the session dropped the
    /// connection
    pub async fn next_sent(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Default)]
struct ConnectorState {
    tokens: Vec<String>,
    opens: usize,
    failures_left: usize,
}

/// Connector handing each opened connection's remote end to the test
pub struct FakeConnector {
    state: Mutex<ConnectorState>,
    remotes: mpsc::UnboundedSender<FakeRemote>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (remotes, remotes_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            state: Mutex::new(ConnectorState::default()),
            remotes,
        });
        (connector, remotes_rx)
    }

    /// Make the next `count` opens fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().failures_left = count;
    }

    /// Tokens of every open attempt, failed ones included
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, token: &str) -> Result<Link, RealtimeError> {
        {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.tokens.push(token.to_string());
            if state.failures_left > 0 {
                state.failures_left -= 1;
                return Err(RealtimeError::Connect("connection refused".to_string()));
            }
        }

        let (outgoing, from_client) = mpsc::unbounded_channel();
        let (to_client, incoming) = mpsc::unbounded_channel();
        let _ = self.remotes.send(FakeRemote {
            from_client,
            to_client,
        });

        Ok(Link { outgoing, incoming })
    }
}
