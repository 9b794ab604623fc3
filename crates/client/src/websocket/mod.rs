//! WebSocket session: transport, lifecycle timers, and the inbound pipeline.
//!
//! - `transport`: socket abstraction and the tokio-tungstenite connector
//! - `session`: the connection task that owns all session state
//! - `client`: cloneable handle to the connection task
//! - `shared`: reference-counted leases over one client
//! - `backoff`, `heartbeat`, `batcher`, `dispatcher`: pure building blocks
//!   driven by the connection task

pub mod backoff;
pub mod batcher;
pub mod client;
pub mod dispatcher;
pub mod heartbeat;
pub mod session;
pub mod shared;
pub mod transport;

pub use client::{RealtimeClient, NORMAL_CLOSURE};
pub use session::{SendOutcome, SessionSnapshot};
pub use shared::{ClientLease, SharedClient};
pub use transport::{Connector, Socket, SocketEvent, TungsteniteConnector, WireFrame};
