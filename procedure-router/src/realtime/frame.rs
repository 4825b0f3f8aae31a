//! Wire frames
//!
//! Every text frame in either direction is a two-element JSON array:
//! `[event, payload]`. The reserved `ping` event is answered with
//! `["pong", null]` by the session itself and never reaches user code.

use crate::{RpcError, RpcResult};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Event name of client heartbeats
pub const PING_EVENT: &str = "ping";

/// Reply to a heartbeat
pub const PONG_FRAME: &str = r#"["pong",null]"#;

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Heartbeat
    Ping,
    /// Application event
    Event {
        /// Event name
        name: String,
        /// Raw payload, not yet validated
        payload: Value,
    },
}

/// Why a frame was rejected.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON at all
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// JSON, but not an `[event, payload]` pair
    #[error("frame must be a two-element [event, payload] array")]
    Shape,
}

/// Decode a text frame.
pub fn decode_frame(text: &str) -> Result<Frame, FrameError> {
    let Value::Array(mut items) = serde_json::from_str::<Value>(text)? else {
        return Err(FrameError::Shape);
    };
    if items.len() != 2 {
        return Err(FrameError::Shape);
    }

    let payload = items.pop().unwrap_or(Value::Null);
    let Some(Value::String(name)) = items.pop() else {
        return Err(FrameError::Shape);
    };

    if name == PING_EVENT {
        return Ok(Frame::Ping);
    }
    Ok(Frame::Event { name, payload })
}

/// Encode an outgoing `[event, payload]` frame.
pub fn encode_frame(event: &str, payload: &impl Serialize) -> RpcResult<String> {
    serde_json::to_string(&(event, payload))
        .map_err(|e| RpcError::serialization(format!("Failed to encode '{}' frame: {}", event, e)))
}
