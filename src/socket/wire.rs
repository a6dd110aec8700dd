//! Wire frames exchanged with clients.
//!
//! # Frames
//! ```text
//! inbound:  { "event": "<name>", ...payload fields }
//! reply:    { "event": "<name>", "data": <any> }
//! error:    { "event": "error", "data": { "message": "...", "code": 1000 | 1001 | 1002 } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::scope::Payload;

/// Reserved numeric codes carried by error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    /// A handler body failed.
    ServerError = 1000,
    /// The connection context is missing or malformed; the connection is closed.
    InvalidConnection = 1001,
    /// The frame or its parameters could not be understood.
    InvalidData = 1002,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Stable label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            Self::ServerError => "server_error",
            Self::InvalidConnection => "invalid_connection",
            Self::InvalidData => "invalid_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
    pub code: u16,
}

/// Outbound error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub event: String,
    pub data: ErrorData,
}

impl ErrorFrame {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            event: "error".to_string(),
            data: ErrorData {
                message: message.into(),
                code: code.as_u16(),
            },
        }
    }

    pub fn to_text(&self) -> String {
        // Strings and integers always serialise.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A typed response returned by a handler, sent back on the same connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub event: String,
    pub data: Value,
}

impl Reply {
    pub fn new(event: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Build a reply whose data is any serialisable value.
    pub fn json<T: Serialize>(event: impl Into<String>, data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event, serde_json::to_value(data)?))
    }

    pub fn to_text(&self) -> String {
        // A `Value` always serialises.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub event: String,
    /// The whole decoded object, `event` included.
    pub payload: Payload,
}

/// Why an inbound frame was rejected.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("frame is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("frame has no \"event\" field")]
    MissingEvent,

    #[error("frame \"event\" must be a string, found {0}")]
    EventNotString(Value),
}

/// Decode one raw frame into an [`InboundMessage`].
pub fn parse_frame(bytes: &[u8], limit: usize) -> Result<InboundMessage, FrameError> {
    if bytes.len() > limit {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }

    let fields: Map<String, Value> = match serde_json::from_slice(bytes)? {
        Value::Object(fields) => fields,
        other => return Err(FrameError::NotAnObject(json_kind(&other))),
    };

    let event = match fields.get("event") {
        Some(Value::String(event)) => event.clone(),
        Some(other) => return Err(FrameError::EventNotString(other.clone())),
        None => return Err(FrameError::MissingEvent),
    };

    Ok(InboundMessage {
        event,
        payload: Payload::new(fields),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_frame_shape() {
        let frame = ErrorFrame::new(ErrorCode::InvalidData, "bad");
        let value: Value = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(value, json!({"event": "error", "data": {"message": "bad", "code": 1002}}));
    }

    #[test]
    fn test_error_frame_escapes_message() {
        let frame = ErrorFrame::new(ErrorCode::ServerError, "card \"7\" missing");
        let decoded: ErrorFrame = serde_json::from_str(&frame.to_text()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_reply_shape() {
        let reply = Reply::new("moved", json!({"card": 3}));
        let value: Value = serde_json::from_str(&reply.to_text()).unwrap();
        assert_eq!(value, json!({"event": "moved", "data": {"card": 3}}));
    }

    #[test]
    fn test_parse_valid_frame_keeps_all_fields() {
        let msg = parse_frame(br#"{"event":"send","text":"hi"}"#, 1024).unwrap();
        assert_eq!(msg.event, "send");
        assert_eq!(msg.payload.get("text"), Some(&json!("hi")));
        assert_eq!(msg.payload.get("event"), Some(&json!("send")));
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        assert!(matches!(parse_frame(b"{not json", 1024), Err(FrameError::Decode(_))));
        assert!(matches!(parse_frame(b"[1,2]", 1024), Err(FrameError::NotAnObject("an array"))));
        assert!(matches!(parse_frame(b"{}", 1024), Err(FrameError::MissingEvent)));
        assert!(matches!(
            parse_frame(br#"{"event":5}"#, 1024),
            Err(FrameError::EventNotString(_))
        ));
        assert!(matches!(
            parse_frame(br#"{"event":"x"}"#, 4),
            Err(FrameError::TooLarge { size: 13, limit: 4 })
        ));
    }
}
