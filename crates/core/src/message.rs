//! Message and tool-call domain types.
//!
//! These are the value objects that flow through a turn:
//! the caller sends a message → the loop asks the model → the model answers
//! with directive text or structured calls → observations are fed back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key used to tag messages the runtime itself synthesizes.
pub const META_KIND: &str = "kind";

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Use the supplied id, or generate one when it is absent or blank.
    pub fn from_optional(id: Option<&str>) -> Self {
        match id.map(str::trim) {
            Some(s) if !s.is_empty() => Self(s.to_string()),
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions and authoritative notes
    System,
    /// The end user (observations and runtime hints are sent as user turns)
    User,
    /// The model
    Assistant,
}

/// A single message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content. Empty when the message only carries tool calls.
    #[serde(default)]
    pub content: String,

    /// Structured tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Set on observations that answer a structured tool call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (synthetic-message tags, provider info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create an assistant message that carries only structured tool calls.
    pub fn assistant_calls(tool_calls: Vec<MessageToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, String::new());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create an observation fed back to the model after a tool call.
    ///
    /// Observations travel as user turns; `tool_call_id` links them to the
    /// structured call they answer so adapters can use a native tool role.
    pub fn observation(tool_call_id: Option<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::User, content.into());
        msg.tool_call_id = tool_call_id;
        msg.set_kind("observation");
        msg
    }

    /// Tag this message with a runtime kind (e.g. "environment", "summary").
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.set_kind(kind);
        self
    }

    fn set_kind(&mut self, kind: &str) {
        self.metadata
            .insert(META_KIND.into(), serde_json::Value::String(kind.into()));
    }

    /// The runtime kind tag, if any.
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get(META_KIND).and_then(|v| v.as_str())
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True when the message has neither text nor tool calls.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// A tool call embedded in an assistant message, as the provider returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

/// The argument payload of a requested call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    /// A JSON object keyed by parameter name (structured mode).
    Named(serde_json::Map<String, serde_json::Value>),
    /// A positional list parsed from directive text.
    Positional(Vec<serde_json::Value>),
}

impl Default for ToolArguments {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl ToolArguments {
    /// Parse the JSON argument string a provider returns.
    ///
    /// Objects become named arguments, arrays positional ones; any other
    /// non-empty payload is passed through as a single positional value.
    pub fn from_json_str(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Named(serde_json::Map::new());
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Self::Named(map),
            Ok(serde_json::Value::Array(items)) => Self::Positional(items),
            Ok(other) => Self::Positional(vec![other]),
            Err(_) => Self::Positional(vec![serde_json::Value::String(raw.to_string())]),
        }
    }

    /// Render the payload back to JSON for logs and stream notifications.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Self::Named(map) => serde_json::Value::Object(map.clone()),
            Self::Positional(items) => serde_json::Value::Array(items.clone()),
        }
    }
}

/// A request to execute a tool, normalized from either call mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// The provider's call id in structured mode; generated in text mode
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// The argument payload
    pub arguments: ToolArguments,

    /// Whether the request came from a structured provider call
    #[serde(default)]
    pub structured: bool,
}

impl ToolCallRequest {
    /// Build a request from directive text (positional arguments).
    pub fn from_directive(name: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            id: format!("act_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments: ToolArguments::Positional(args),
            structured: false,
        }
    }
}

impl From<&MessageToolCall> for ToolCallRequest {
    fn from(tc: &MessageToolCall) -> Self {
        Self {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: ToolArguments::from_json_str(&tc.arguments),
            structured: true,
        }
    }
}
