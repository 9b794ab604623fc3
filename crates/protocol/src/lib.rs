//! Kefu Protocol - wire types for the customer-service realtime channel
//!
//! This crate contains the JSON frames exchanged between the kefu console and
//! the chat backend over a single WebSocket:
//! - Inbound frames (`ServerMessage`, tagged by `type`)
//! - Outbound frames (`ClientFrame`)
//! - Presence vocabulary shared by both directions
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json, and thiserror
//! 2. **No business logic** - Pure data types, serialization, and identity keys
//! 3. **Tolerant decoding** - unknown `type` tags decode to an untyped body

pub mod frame;
pub mod messages;
pub mod types;

pub use frame::{decode_frame, DecodeError, DecodedFrame, FrameBody};
pub use messages::{ChatMessage, ClientFrame, ServerMessage, HEARTBEAT_FRAME_TYPE};
pub use types::{PresenceStatus, PresenceUser};
