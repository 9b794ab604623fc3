//! Typed dispatcher: routes decoded frames to per-type handlers.
//!
//! Each handler only translates a message into zero or more [`ClientEvent`]s.
//! Presence messages are diffed against the last known presence so
//! subscribers receive deltas instead of full snapshots.

use std::collections::BTreeMap;

use kefu_protocol::{DecodedFrame, FrameBody, PresenceStatus, PresenceUser, ServerMessage};

use crate::messaging::{ClientEvent, PresenceUpdate};

/// Last known presence per user id.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    users: BTreeMap<String, PresenceUser>,
}

impl PresenceTracker {
    pub fn users(&self) -> Vec<PresenceUser> {
        self.users.values().cloned().collect()
    }

    pub fn get(&self, user_id: &str) -> Option<&PresenceUser> {
        self.users.get(user_id)
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }

    /// Replace everything with an authoritative snapshot.
    pub fn apply_snapshot(&mut self, snapshot: Vec<PresenceUser>) -> PresenceUpdate {
        let mut update = PresenceUpdate::default();
        let mut next = BTreeMap::new();
        for user in snapshot {
            next.insert(user.user_id.clone(), user);
        }

        for (user_id, user) in &next {
            match self.users.get(user_id) {
                None => update.added.push(user.clone()),
                Some(previous) if previous != user => update.updated.push(user.clone()),
                Some(_) => {}
            }
        }
        for (user_id, previous) in &self.users {
            if !next.contains_key(user_id) {
                update.removed.push(previous.clone());
            }
        }

        self.users = next;
        self.finish(update)
    }

    /// Insert or merge one user. Fields absent from `incoming` keep their
    /// previous values.
    pub fn upsert(&mut self, incoming: PresenceUser) -> PresenceUpdate {
        let mut update = PresenceUpdate::default();
        match self.users.get(&incoming.user_id) {
            None => update.added.push(incoming.clone()),
            Some(previous) => {
                let merged = PresenceUser {
                    user_id: incoming.user_id.clone(),
                    user_type: incoming.user_type.clone().or_else(|| previous.user_type.clone()),
                    name: incoming.name.clone().or_else(|| previous.name.clone()),
                    status: incoming.status,
                };
                if &merged == previous {
                    return PresenceUpdate::default();
                }
                update.updated.push(merged.clone());
                self.users.insert(merged.user_id.clone(), merged);
                return self.finish(update);
            }
        }
        self.users.insert(incoming.user_id.clone(), incoming);
        self.finish(update)
    }

    pub fn set_status(&mut self, user_id: &str, status: PresenceStatus) -> PresenceUpdate {
        let user = match self.users.get(user_id) {
            Some(previous) => PresenceUser {
                status,
                ..previous.clone()
            },
            None => PresenceUser::new(user_id, status),
        };
        self.upsert(user)
    }

    pub fn remove(&mut self, user_id: &str) -> PresenceUpdate {
        match self.users.remove(user_id) {
            Some(previous) => self.finish(PresenceUpdate {
                removed: vec![previous],
                ..PresenceUpdate::default()
            }),
            None => PresenceUpdate::default(),
        }
    }

    fn finish(&self, mut update: PresenceUpdate) -> PresenceUpdate {
        if !update.is_empty() {
            update.users = self.users();
        }
        update
    }
}

/// Routes frames to handlers. Holds presence only; no UI state.
#[derive(Debug, Default)]
pub struct Dispatcher {
    presence: PresenceTracker,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn reset(&mut self) {
        self.presence.clear();
    }

    /// Translate one frame into the events it produces.
    pub fn dispatch(&mut self, frame: DecodedFrame) -> Vec<ClientEvent> {
        match frame.body {
            FrameBody::Typed(message) => self.dispatch_typed(message),
            FrameBody::Untyped(body) => vec![ClientEvent::Message {
                kind: frame.kind,
                body,
            }],
        }
    }

    fn dispatch_typed(&mut self, message: ServerMessage) -> Vec<ClientEvent> {
        let event = match message {
            ServerMessage::OnlineUsers { users } => {
                return presence_event(self.presence.apply_snapshot(users));
            }
            ServerMessage::UserJoined {
                user_id,
                user_type,
                name,
                status,
            } => {
                return presence_event(self.presence.upsert(PresenceUser {
                    user_id,
                    user_type,
                    name,
                    status,
                }));
            }
            ServerMessage::UserLeft { user_id } => {
                return presence_event(self.presence.remove(&user_id));
            }
            ServerMessage::UserStatusChange { user_id, status } => {
                return presence_event(self.presence.set_status(&user_id, status));
            }
            ServerMessage::Chat(chat) => ClientEvent::Chat(chat),
            ServerMessage::Typing { user_id, is_typing } => {
                ClientEvent::Typing { user_id, is_typing }
            }
            ServerMessage::Heartbeat { .. } => ClientEvent::HeartbeatAck,
            ServerMessage::System { message, level } => ClientEvent::System { message, level },
            ServerMessage::RealtimeStatusChange { user_id, status } => {
                ClientEvent::RealtimeStatus { user_id, status }
            }
            ServerMessage::Welcome { client_id, message } => {
                ClientEvent::Welcome { client_id, message }
            }
            ServerMessage::Status { status, message } => ClientEvent::Status { status, message },
            ServerMessage::Error { message, code } => {
                tracing::warn!(code = ?code, "Server reported error: {}", message);
                ClientEvent::ServerError { message, code }
            }
        };
        vec![event]
    }
}

fn presence_event(update: PresenceUpdate) -> Vec<ClientEvent> {
    if update.is_empty() {
        Vec::new()
    } else {
        vec![ClientEvent::UserUpdate(update)]
    }
}
