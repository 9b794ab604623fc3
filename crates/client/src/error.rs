//! Error types for the realtime client.

use std::time::Duration;

use thiserror::Error;

/// Failure to establish or use a socket.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake or TCP/TLS connect failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The socket's writer is gone.
    #[error("Socket closed")]
    Closed,
}

/// Errors surfaced to callers of [`crate::RealtimeClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No live connection and the frame was not queued.
    #[error("Not connected")]
    NotConnected,

    /// The outbound queue was full and the frame was dropped.
    #[error("Outbound queue full")]
    QueueFull,

    /// The client was closed while the operation was pending.
    #[error("Client closed")]
    Closed,

    /// No correlated response arrived in time.
    #[error("Request {request_id} timed out after {timeout:?}")]
    RequestTimeout {
        request_id: String,
        timeout: Duration,
    },

    /// The server answered a request with an `Error` frame.
    #[error("Server error: {message}")]
    Server {
        message: String,
        code: Option<String>,
    },

    /// The connection task has shut down.
    #[error("Connection task is no longer running")]
    TaskGone,
}
