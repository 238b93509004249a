//! Realtime connection seam
//!
//! A [`Connector`] opens one authenticated connection and hands back a
//! [`Link`]: a pair of channels for outgoing frames and incoming signals.
//! The session owns the link for as long as the connection lives; dropping
//! the outgoing sender closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::frame::Frame;
use crate::error::RealtimeError;

/// Why a live connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the session on purpose
    ServerTerminated,
    /// The connection dropped without a close handshake
    TransportClosed,
    /// The connection failed with an error
    TransportError(String),
    /// This side closed the connection
    ClientTeardown,
}

impl DisconnectReason {
    /// Whether the automatic reconnect policy applies
    pub fn is_transport_loss(&self) -> bool {
        matches!(
            self,
            DisconnectReason::TransportClosed | DisconnectReason::TransportError(_)
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ServerTerminated => write!(f, "closed by server"),
            DisconnectReason::TransportClosed => write!(f, "connection lost"),
            DisconnectReason::TransportError(e) => write!(f, "connection error: {}", e),
            DisconnectReason::ClientTeardown => write!(f, "closed by client"),
        }
    }
}

/// Something the connection reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum LinkSignal {
    Event(Frame),
    /// A non-fatal problem, such as an undecodable message
    Error(String),
    /// The connection is gone; nothing follows
    Closed(DisconnectReason),
}

/// Channels of one live connection
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<LinkSignal>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection authenticated with `token`
    async fn open(&self, token: &str) -> Result<Link, RealtimeError>;
}

/// WebSocket connector
///
/// The access token travels as an `Authorization: Bearer` header on the
/// upgrade request.
pub struct WsConnector {
    url: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, token: &str) -> Result<Link, RealtimeError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);

        let (ws_stream, _) = tokio::time::timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| RealtimeError::Connect("handshake timed out".to_string()))?
            .map_err(|e| match e {
                WsError::Http(response) => {
                    RealtimeError::Handshake(format!("server answered {}", response.status()))
                }
                other => RealtimeError::Connect(other.to_string()),
            })?;

        debug!("Realtime connection open to {}", self.url);

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws_stream, outgoing_rx, incoming_tx));

        Ok(Link {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Move frames between the socket and the link channels until either side
/// goes away
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outgoing: mpsc::UnboundedReceiver<Frame>,
    incoming: mpsc::UnboundedSender<LinkSignal>,
) {
    let (mut write, mut read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            frame = outgoing.recv() => {
                match frame {
                    Some(frame) => match frame.encode() {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                break DisconnectReason::TransportError(e.to_string());
                            }
                        }
                        Err(e) => {
                            let _ = incoming.send(LinkSignal::Error(e.to_string()));
                        }
                    },
                    None => {
                        // The session dropped the link
                        write.close().await.ok();
                        break DisconnectReason::ClientTeardown;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let signal = match Frame::decode(&text) {
                            Ok(frame) => LinkSignal::Event(frame),
                            Err(e) => {
                                warn!("Undecodable realtime message: {}", e);
                                LinkSignal::Error(e.to_string())
                            }
                        };
                        if incoming.send(signal).is_err() {
                            write.close().await.ok();
                            break DisconnectReason::ClientTeardown;
                        }
                    }
                    Some(Ok(Message::Close(_))) => break DisconnectReason::ServerTerminated,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break DisconnectReason::TransportError(e.to_string()),
                    None => break DisconnectReason::TransportClosed,
                }
            }
        }
    };

    debug!("Realtime connection ended: {}", reason);
    let _ = incoming.send(LinkSignal::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    /// Accept one connection, check its bearer, then run `script`
    async fn serve_once<F, Fut>(script: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>, Option<String>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth = None;
            let ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
                auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            })
            .await
            .unwrap();
            script(ws, auth).await;
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let url = serve_once(|mut ws, auth| async move {
            assert_eq!(auth.as_deref(), Some("Bearer a1"));
            // Echo the first frame back under a different event name
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let frame = Frame::decode(&text).unwrap();
                let reply = Frame::new("echo", frame.data).encode().unwrap();
                ws.send(Message::Text(reply)).await.unwrap();
            }
            ws.close(None).await.ok();
        })
        .await;

        let mut link = WsConnector::new(url).open("a1").await.unwrap();
        link.outgoing
            .send(Frame::new("typing", json!({"chat": 4})))
            .unwrap();

        assert_eq!(
            link.incoming.recv().await,
            Some(LinkSignal::Event(Frame::new("echo", json!({"chat": 4}))))
        );
        assert_eq!(
            link.incoming.recv().await,
            Some(LinkSignal::Closed(DisconnectReason::ServerTerminated))
        );
    }

    #[tokio::test]
    async fn test_undecodable_message_is_reported() {
        let url = serve_once(|mut ws, _| async move {
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"ok"}"#.into())).await.unwrap();
            // Keep the socket open until the client leaves
            while ws.next().await.is_some() {}
        })
        .await;

        let mut link = WsConnector::new(url).open("a1").await.unwrap();
        assert!(matches!(link.incoming.recv().await, Some(LinkSignal::Error(_))));
        assert_eq!(
            link.incoming.recv().await,
            Some(LinkSignal::Event(Frame::new("ok", serde_json::Value::Null)))
        );
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let result = WsConnector::new("ws://127.0.0.1:9")
            .with_handshake_timeout(Duration::from_secs(2))
            .open("a1")
            .await;
        assert!(matches!(result, Err(RealtimeError::Connect(_))));
    }

    #[test]
    fn test_transport_loss_classification() {
        assert!(DisconnectReason::TransportClosed.is_transport_loss());
        assert!(DisconnectReason::TransportError("reset".into()).is_transport_loss());
        assert!(!DisconnectReason::ServerTerminated.is_transport_loss());
        assert!(!DisconnectReason::ClientTeardown.is_transport_loss());
    }
}
