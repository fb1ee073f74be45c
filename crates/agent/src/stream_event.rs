//! Turn-level streaming events.
//!
//! `TurnEvent` is what the loop sends down a turn's channel; the gateway
//! forwards each one to the client as an SSE event.

use crate::turn::FinishReason;
use serde::{Deserialize, Serialize};

/// The semantic role of a streamed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Thinking,
    Reasoning,
    Action,
    ActionStart,
    ActionEnd,
    Observation,
    Answer,
    Ask,
    Content,
    Error,
}

/// A piece of text labelled with its content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedChunk {
    pub content_type: ContentType,
    pub text: String,
}

impl TypedChunk {
    pub fn new(content_type: ContentType, text: impl Into<String>) -> Self {
        Self {
            content_type,
            text: text.into(),
        }
    }
}

/// Events emitted while a turn runs.
///
/// - `chunk`    : typed text
/// - `tool_call`: a frontend tool must run on the client
/// - `done`     : the turn finished (stream sentinel)
/// - `error`    : the turn failed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Chunk {
        content_type: ContentType,
        text: String,
    },

    ToolCall {
        session_id: String,
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    Done {
        session_id: String,
        finish_reason: FinishReason,
        steps: usize,
    },

    Error { message: String },
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn chunk(content_type: ContentType, text: impl Into<String>) -> Self {
        Self::Chunk {
            content_type,
            text: text.into(),
        }
    }
}

impl From<TypedChunk> for TurnEvent {
    fn from(chunk: TypedChunk) -> Self {
        Self::Chunk {
            content_type: chunk.content_type,
            text: chunk.text,
        }
    }
}
