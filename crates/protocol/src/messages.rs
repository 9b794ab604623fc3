//! WebSocket message types for the kefu realtime channel

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{PresenceStatus, PresenceUser};

/// `type` tag of the keep-alive frame sent by the client.
pub const HEARTBEAT_FRAME_TYPE: &str = "heartbeat";

/// Messages from server (chat backend) to client (console)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Full snapshot of users currently known to the server
    OnlineUsers { users: Vec<PresenceUser> },
    /// A user came online
    UserJoined {
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_type: Option<String>,
        #[serde(default, alias = "username", skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        status: PresenceStatus,
    },
    /// A user went away entirely
    UserLeft { user_id: String },
    /// A known user changed status
    UserStatusChange {
        user_id: String,
        status: PresenceStatus,
    },
    /// Chat message between a customer and an agent
    Chat(ChatMessage),
    /// Typing indicator
    Typing {
        user_id: String,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    /// Server heartbeat acknowledgement
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// System notice for display
    System {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<String>,
    },
    /// Agent realtime availability toggled
    #[serde(rename = "realtime_status_change")]
    RealtimeStatusChange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        status: String,
    },
    /// Greeting sent right after the handshake
    Welcome {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Service status report
    Status {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Server-side error report
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

/// Chat payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned id; used to drop redelivered messages
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(alias = "from")]
    pub sender_id: String,
    #[serde(default, alias = "to", skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
}

impl ServerMessage {
    /// Every `type` tag decoded into a typed variant.
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "OnlineUsers",
        "UserJoined",
        "UserLeft",
        "UserStatusChange",
        "Chat",
        "Typing",
        "Heartbeat",
        "System",
        "realtime_status_change",
        "Welcome",
        "Status",
        "Error",
    ];

    pub fn is_known_type(kind: &str) -> bool {
        Self::KNOWN_TYPES.contains(&kind)
    }

    /// Wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::OnlineUsers { .. } => "OnlineUsers",
            ServerMessage::UserJoined { .. } => "UserJoined",
            ServerMessage::UserLeft { .. } => "UserLeft",
            ServerMessage::UserStatusChange { .. } => "UserStatusChange",
            ServerMessage::Chat(_) => "Chat",
            ServerMessage::Typing { .. } => "Typing",
            ServerMessage::Heartbeat { .. } => "Heartbeat",
            ServerMessage::System { .. } => "System",
            ServerMessage::RealtimeStatusChange { .. } => "realtime_status_change",
            ServerMessage::Welcome { .. } => "Welcome",
            ServerMessage::Status { .. } => "Status",
            ServerMessage::Error { .. } => "Error",
        }
    }

    /// Key for state-like messages that describe one piece of state.
    ///
    /// Two messages with the same key may be folded into one with
    /// [`ServerMessage::supersede`]. Discrete events return `None`.
    pub fn state_key(&self) -> Option<String> {
        match self {
            ServerMessage::OnlineUsers { .. } => Some("online_users".to_string()),
            ServerMessage::UserJoined { user_id, .. }
            | ServerMessage::UserLeft { user_id }
            | ServerMessage::UserStatusChange { user_id, .. } => {
                Some(format!("presence:{user_id}"))
            }
            ServerMessage::Typing { user_id, .. } => Some(format!("typing:{user_id}")),
            ServerMessage::RealtimeStatusChange { user_id, .. } => Some(format!(
                "realtime_status:{}",
                user_id.as_deref().unwrap_or_default()
            )),
            ServerMessage::Status { .. } => Some("status".to_string()),
            _ => None,
        }
    }

    /// Fold `earlier` into this later message with the same state key.
    ///
    /// Returns the single message whose effect equals applying both in order,
    /// or `None` when no such message exists and both must be kept. Presence
    /// joins merge field by field: a later join or status change never loses
    /// the name or user type an earlier join carried.
    pub fn supersede(&self, earlier: &ServerMessage) -> Option<ServerMessage> {
        use ServerMessage::{UserJoined, UserLeft, UserStatusChange};

        match (earlier, self) {
            (_, UserLeft { .. }) => Some(self.clone()),
            (UserLeft { .. }, _) => None,
            (
                UserJoined {
                    user_id,
                    user_type,
                    name,
                    ..
                },
                UserStatusChange { status, .. },
            ) => Some(UserJoined {
                user_id: user_id.clone(),
                user_type: user_type.clone(),
                name: name.clone(),
                status: *status,
            }),
            (
                UserJoined {
                    user_type: earlier_type,
                    name: earlier_name,
                    ..
                },
                UserJoined {
                    user_id,
                    user_type,
                    name,
                    status,
                },
            ) => Some(UserJoined {
                user_id: user_id.clone(),
                user_type: user_type.clone().or_else(|| earlier_type.clone()),
                name: name.clone().or_else(|| earlier_name.clone()),
                status: *status,
            }),
            (UserStatusChange { .. }, UserJoined { .. } | UserStatusChange { .. }) => {
                Some(self.clone())
            }
            _ if earlier.kind() == self.kind() => Some(self.clone()),
            _ => None,
        }
    }

    /// Delivery id of a discrete event, if the server supplied one.
    pub fn event_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Chat(chat) => chat.message_id.as_deref(),
            _ => None,
        }
    }
}

/// Frame sent from client to server.
///
/// Wire shape: `{ "type": ..., "payload": {...}, "timestamp": RFC 3339, "request_id"?: ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: String,
    /// Correlation id when the frame expects a response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ClientFrame {
    pub fn new(kind: impl Into<String>, payload: Value, timestamp: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: timestamp.into(),
            request_id: None,
        }
    }

    pub fn heartbeat(timestamp: impl Into<String>) -> Self {
        Self::new(
            HEARTBEAT_FRAME_TYPE,
            Value::Object(Default::default()),
            timestamp,
        )
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind == HEARTBEAT_FRAME_TYPE
    }
}
