use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::messages::{CallTermination, ClientEvent, ServerEvent};
use crate::error::StreamError;

/// One-shot delivery of a linked-call termination message to a distinct
/// termination endpoint. The session never calls this on its own.
pub async fn send_termination(url: &str, message: &CallTermination) -> Result<(), StreamError> {
    let (mut ws, _response) = connect_async(url)
        .await
        .map_err(|e| StreamError::ConnectionError(e.to_string()))?;

    let text = serde_json::to_string(message)
        .map_err(|e| StreamError::ConnectionError(e.to_string()))?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| StreamError::ConnectionError(e.to_string()))?;
    let _ = ws.close(None).await;
    Ok(())
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Websocket endpoint for the media stream
    pub url: String,
    /// Bound on reaching the open state from a connect request
    pub connect_timeout: Duration,
    /// Bearer credential attached to the handshake, supplied by the
    /// identity layer; not part of the event protocol itself
    pub bearer_token: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/stream".to_string(),
            connect_timeout: Duration::from_secs(10),
            bearer_token: None,
        }
    }
}

/// Updates surfaced from a live connection to its owner.
#[derive(Debug)]
pub enum TransportUpdate {
    Event(ServerEvent),
    /// The connection ended. `deliberate` is true only for a locally
    /// initiated normal closure; everything else must feed reconnection.
    Closed { deliberate: bool, reason: String },
}

enum Outbound {
    Event(ClientEvent),
    Close,
}

/// Cheap cloneable handle for emitting events onto a connection's ordered
/// outbound queue. This is the only surface the capture path sees; the
/// socket itself stays owned by the transport tasks.
#[derive(Clone)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TransportSender {
    /// Fire-and-forget send. Fails with [`StreamError::SendFailure`] when
    /// the socket is gone; never blocks frame production.
    pub fn send(&self, event: ClientEvent) -> Result<(), StreamError> {
        self.tx
            .send(Outbound::Event(event))
            .map_err(|_| StreamError::SendFailure)
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// One live websocket connection carrying the event protocol.
///
/// Owns the socket through a writer task (draining a single FIFO queue, so
/// outbound order is exactly production order) and a reader task that parses
/// inbound events and reports the close disposition.
pub struct StreamTransport {
    sender: TransportSender,
    deliberate: Arc<AtomicBool>,
}

impl StreamTransport {
    /// Open the socket, enforcing the connect timeout, and spawn the I/O
    /// tasks. Inbound events and the final close arrive on `updates`.
    pub async fn connect(
        config: &TransportConfig,
        updates: mpsc::Sender<TransportUpdate>,
    ) -> Result<Self, StreamError> {
        info!("Connecting to {}", config.url);

        let mut request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::ConnectionError(e.to_string()))?;
        if let Some(token) = &config.bearer_token {
            let value: HeaderValue = format!("Bearer {}", token)
                .parse()
                .map_err(|_| StreamError::ConnectionError("invalid bearer token".to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let connect = connect_async(request);
        let (ws, _response) = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| StreamError::ConnectionTimeout(config.connect_timeout))?
            .map_err(|e| StreamError::ConnectionError(e.to_string()))?;

        info!("Connected to {}", config.url);

        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        let deliberate = Arc::new(AtomicBool::new(false));

        // Writer: single consumer of the outbound queue, preserving FIFO
        // order all the way onto the socket.
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Event(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to serialize outbound event: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!("Socket write failed: {}", e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "session ended".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!("Close frame not delivered: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        // Reader: parse events until the socket ends, then report how it
        // ended so the session can decide whether to reconnect.
        let reader_deliberate = Arc::clone(&deliberate);
        tokio::spawn(async move {
            let (deliberate, reason) = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if updates.send(TransportUpdate::Event(event)).await.is_err() {
                                    break (true, "session dropped".to_string());
                                }
                            }
                            Err(e) => warn!("Ignoring unparseable inbound message: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed without reason".to_string());
                        break (reader_deliberate.load(Ordering::SeqCst), reason);
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Ignoring unexpected binary message");
                    }
                    Some(Ok(_)) => {} // ping/pong/raw frames
                    Some(Err(e)) => {
                        break (reader_deliberate.load(Ordering::SeqCst), e.to_string());
                    }
                    None => {
                        break (
                            reader_deliberate.load(Ordering::SeqCst),
                            "socket closed".to_string(),
                        );
                    }
                }
            };

            let _ = updates
                .send(TransportUpdate::Closed { deliberate, reason })
                .await;
        });

        Ok(Self {
            sender: TransportSender { tx },
            deliberate,
        })
    }

    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Deliberate local close: sends a Normal close code after everything
    /// already queued, and marks the teardown so no reconnection follows.
    pub fn close(&self) {
        self.deliberate.store(true, Ordering::SeqCst);
        let _ = self.sender.tx.send(Outbound::Close);
    }
}
