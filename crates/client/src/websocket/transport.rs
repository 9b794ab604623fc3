//! Transport connection: one socket, exposed as a pair of channels.
//!
//! A [`Connector`] opens a socket and hands back a [`Socket`]: a sender for
//! outbound [`WireFrame`]s and a receiver of [`SocketEvent`]s. The connection
//! task never touches the WebSocket library directly, so tests can swap in an
//! in-memory connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::error::TransportError;

/// Close code used when the socket vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Frame written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Lifecycle and data events raised by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    Closed {
        was_clean: bool,
        code: Option<u16>,
        reason: String,
    },
    Error(String),
}

/// Channel pair for one open socket.
#[derive(Debug)]
pub struct Socket {
    pub outbound: mpsc::UnboundedSender<WireFrame>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens sockets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Socket, TransportError>;
}

/// One live socket owned by the connection task.
///
/// Dropping it closes the outbound channel, which ends the writer.
#[derive(Debug)]
pub struct TransportConnection {
    generation: u64,
    outbound: mpsc::UnboundedSender<WireFrame>,
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

impl TransportConnection {
    pub fn new(generation: u64, socket: Socket) -> Self {
        Self {
            generation,
            outbound: socket.outbound,
            inbound: socket.inbound,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(WireFrame::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    /// Client-initiated close. Consumes the connection.
    pub fn close(self, code: u16, reason: &str) {
        let _ = self.outbound.send(WireFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next event; a vanished socket reads as an abnormal close.
    pub async fn next_event(&mut self) -> SocketEvent {
        self.inbound.recv().await.unwrap_or_else(|| SocketEvent::Closed {
            was_clean: false,
            code: Some(ABNORMAL_CLOSURE),
            reason: "transport dropped".to_string(),
        })
    }
}

// =============================================================================
// tokio-tungstenite
// =============================================================================

/// Production connector using tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Socket, TransportError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(host = url.host_str().unwrap_or_default(), "WebSocket handshake complete");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let (message, closing) = match frame {
                    WireFrame::Text(text) => (Message::Text(text), false),
                    WireFrame::Close { code, reason } => (
                        Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                        true,
                    ),
                };
                if let Err(e) = write.send(message).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = read.next() => next,
                    // Owner discarded the connection; stop reading.
                    _ = in_tx.closed() => break,
                };
                let event = match next {
                    Some(Ok(Message::Text(text))) => SocketEvent::Text(text),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::new()),
                        };
                        tracing::info!(code = ?code, "Server closed connection");
                        let _ = in_tx.send(SocketEvent::Closed {
                            was_clean: true,
                            code,
                            reason,
                        });
                        break;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::debug!(len = bytes.len(), "Ignoring binary frame");
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        let _ = in_tx.send(SocketEvent::Error(e.to_string()));
                        let _ = in_tx.send(SocketEvent::Closed {
                            was_clean: false,
                            code: Some(ABNORMAL_CLOSURE),
                            reason: e.to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = in_tx.send(SocketEvent::Closed {
                            was_clean: false,
                            code: Some(ABNORMAL_CLOSURE),
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                };
                if in_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(Socket {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
