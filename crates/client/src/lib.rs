//! Kefu realtime client.
//!
//! A resilient WebSocket client for the customer-service console:
//! reconnect with backoff, heartbeat keep-alive, inbound batching with
//! de-duplication, typed dispatch with presence diffs, and a pub/sub emitter
//! that UI code subscribes to.
//!
//! ```text
//! transport ──raw frame──▶ batcher ──batch──▶ dispatcher ──events──▶ emitter ──▶ subscribers
//!     ▲
//!     └── reconnect policy / heartbeat monitor (lifecycle only)
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod messaging;
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{ClockPort, SystemClock};
pub use config::{BackoffStrategy, ClientConfig, ConfigError, ConnectionTarget, Identity};
pub use error::{ClientError, TransportError};
pub use messaging::{
    ClientEvent, ConnectionState, ConnectionStateObserver, EventEmitter, EventKind,
    PresenceUpdate, SubscriptionId,
};
pub use websocket::{
    ClientLease, Connector, RealtimeClient, SendOutcome, SessionSnapshot, SharedClient,
    TungsteniteConnector,
};
