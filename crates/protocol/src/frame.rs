//! Decoding of raw inbound text frames.

use serde_json::Value;
use thiserror::Error;

use crate::messages::ServerMessage;

/// Why an inbound frame could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("`{kind}` frame has unexpected shape: {source}")]
    InvalidShape {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Body of a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    Typed(ServerMessage),
    /// `type` not recognised by this client; the whole frame is kept
    Untyped(Value),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub kind: String,
    /// Correlation id echoed by the server for request/response frames
    pub request_id: Option<String>,
    pub body: FrameBody,
}

impl DecodedFrame {
    pub fn typed(&self) -> Option<&ServerMessage> {
        match &self.body {
            FrameBody::Typed(message) => Some(message),
            FrameBody::Untyped(_) => None,
        }
    }

    /// Frame body as JSON, used when resolving a pending request.
    pub fn to_value(&self) -> Value {
        match &self.body {
            FrameBody::Typed(message) => serde_json::to_value(message).unwrap_or(Value::Null),
            FrameBody::Untyped(value) => value.clone(),
        }
    }
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<DecodedFrame, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(DecodeError::InvalidJson)?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();
    let request_id = value
        .get("request_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let body = if ServerMessage::is_known_type(&kind) {
        let message = serde_json::from_value(value).map_err(|source| DecodeError::InvalidShape {
            kind: kind.clone(),
            source,
        })?;
        FrameBody::Typed(message)
    } else {
        FrameBody::Untyped(value)
    };

    Ok(DecodedFrame {
        kind,
        request_id,
        body,
    })
}
