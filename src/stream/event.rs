//! Typed analysis events and the payload codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::frame::Frame;
use crate::error::ProtocolError;

/// Tags accepted on the wire
const KNOWN_TAGS: &[&str] = &[
    "token",
    "tool_start",
    "tool_end",
    "custom",
    "done",
    "error",
    "session_created",
];

/// One unit of progress relayed to the consumer of an analysis session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of the running transcript
    Token { content: String },
    ToolStart {
        #[serde(alias = "tool")]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolEnd {
        #[serde(alias = "tool")]
        name: String,
        #[serde(default)]
        output: Value,
    },
    /// Opaque payload from the judgment engine
    Custom {
        #[serde(default)]
        data: Value,
    },
    Done,
    Error {
        #[serde(default, alias = "error")]
        message: String,
    },
    /// Emitted by the client before any backend event
    SessionCreated {
        session_id: String,
        correlation_id: String,
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        agent_kind: String,
        #[serde(default)]
        started_at: String,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::Custom { .. } => "custom",
            StreamEvent::Done => "done",
            StreamEvent::Error { .. } => "error",
            StreamEvent::SessionCreated { .. } => "session_created",
        }
    }
}

/// Classify one frame payload.
pub fn decode_event(payload: &str) -> Result<StreamEvent, ProtocolError> {
    let value: Value = serde_json::from_str(payload)?;

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingTag)?;
    if !KNOWN_TAGS.contains(&tag) {
        return Err(ProtocolError::UnknownTag(tag.to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

/// Turn a decoded frame into an event, dropping payloads that fail to decode.
///
/// A bad frame is logged and skipped so the rest of the stream keeps flowing.
pub fn frame_to_event(frame: Frame) -> Option<StreamEvent> {
    match frame {
        Frame::Done => Some(StreamEvent::Done),
        Frame::Data(payload) => match decode_event(&payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping undecodable event frame: {} (payload: {})", e, payload);
                None
            }
        },
    }
}
