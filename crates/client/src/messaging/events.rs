//! Events published by the realtime client.

use std::time::Duration;

use kefu_protocol::{ChatMessage, PresenceUser};
use serde_json::Value;

use super::connection::ConnectionState;

/// Presence delta produced by the dispatcher.
///
/// `users` is the full presence list after the change, sorted by `user_id`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresenceUpdate {
    pub added: Vec<PresenceUser>,
    pub updated: Vec<PresenceUser>,
    /// Last known value of each removed user
    pub removed: Vec<PresenceUser>,
    pub users: Vec<PresenceUser>,
}

impl PresenceUpdate {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Everything a subscriber can receive.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    // Lifecycle
    StateChanged(ConnectionState),
    Opened,
    Closed {
        was_clean: bool,
        code: Option<u16>,
        reason: String,
    },
    Error {
        detail: String,
    },
    /// Every text frame as received, before decoding
    RawFrame(String),
    ParseError {
        detail: String,
        raw: String,
    },
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    ReconnectExhausted {
        attempts: u32,
    },

    // Dispatched messages
    UserUpdate(PresenceUpdate),
    Chat(ChatMessage),
    Typing {
        user_id: String,
        is_typing: bool,
    },
    HeartbeatAck,
    System {
        message: String,
        level: Option<String>,
    },
    RealtimeStatus {
        user_id: Option<String>,
        status: String,
    },
    Welcome {
        client_id: Option<String>,
        message: Option<String>,
    },
    Status {
        status: String,
        message: Option<String>,
    },
    ServerError {
        message: String,
        code: Option<String>,
    },
    /// Frame with a `type` this client has no handler for
    Message {
        kind: String,
        body: Value,
    },
}

/// Subscription key. `All` receives every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    Opened,
    Closed,
    Error,
    RawFrame,
    ParseError,
    ReconnectScheduled,
    ReconnectExhausted,
    UserUpdate,
    Chat,
    Typing,
    HeartbeatAck,
    System,
    RealtimeStatus,
    Welcome,
    Status,
    ServerError,
    Message,
    All,
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::StateChanged(_) => EventKind::StateChanged,
            ClientEvent::Opened => EventKind::Opened,
            ClientEvent::Closed { .. } => EventKind::Closed,
            ClientEvent::Error { .. } => EventKind::Error,
            ClientEvent::RawFrame(_) => EventKind::RawFrame,
            ClientEvent::ParseError { .. } => EventKind::ParseError,
            ClientEvent::ReconnectScheduled { .. } => EventKind::ReconnectScheduled,
            ClientEvent::ReconnectExhausted { .. } => EventKind::ReconnectExhausted,
            ClientEvent::UserUpdate(_) => EventKind::UserUpdate,
            ClientEvent::Chat(_) => EventKind::Chat,
            ClientEvent::Typing { .. } => EventKind::Typing,
            ClientEvent::HeartbeatAck => EventKind::HeartbeatAck,
            ClientEvent::System { .. } => EventKind::System,
            ClientEvent::RealtimeStatus { .. } => EventKind::RealtimeStatus,
            ClientEvent::Welcome { .. } => EventKind::Welcome,
            ClientEvent::Status { .. } => EventKind::Status,
            ClientEvent::ServerError { .. } => EventKind::ServerError,
            ClientEvent::Message { .. } => EventKind::Message,
        }
    }
}
