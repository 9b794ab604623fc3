//! Event and request plumbing between the connection task and its callers.
//!
//! - `EventEmitter`: push-based pub/sub that UI code subscribes to
//! - `ClientEvent`: everything the client publishes
//! - `PendingRequests`: request/response correlation
//! - `ConnectionStateObserver`: read-only view of the lifecycle state

pub mod connection;
pub mod correlation;
pub mod emitter;
pub mod events;

pub use connection::{ConnectionState, ConnectionStateObserver};
pub use correlation::{PendingRequests, RequestResult};
pub use emitter::{EventEmitter, SubscriptionId};
pub use events::{ClientEvent, EventKind, PresenceUpdate};
