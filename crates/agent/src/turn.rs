//! Turn input and output types.

use agentrelay_core::message::{Message, Role};
use agentrelay_core::provider::ToolDefinition;
use serde::{Deserialize, Serialize};

/// A role-tagged message as a caller supplies it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn into_message(self) -> Message {
        match self.role {
            Role::System => Message::system(self.content),
            Role::User => Message::user(self.content),
            Role::Assistant => Message::assistant(self.content),
        }
    }
}

/// One chat turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Session to continue; a fresh id is generated when absent or blank
    #[serde(default)]
    pub session_id: Option<String>,

    /// Role-tagged messages, newest last
    #[serde(default)]
    pub messages: Vec<InputMessage>,

    /// Model override for this turn
    #[serde(default)]
    pub model: Option<String>,

    /// Stream typed chunks while the turn runs
    #[serde(default)]
    pub stream: bool,

    /// Tools executed by the remote client for this turn
    #[serde(default)]
    pub frontend_tools: Vec<ToolDefinition>,

    /// Authoritative environment lines (current page, user locale, …)
    #[serde(default)]
    pub environment: Vec<String>,
}

impl TurnRequest {
    /// A turn carrying a single user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![InputMessage::user(content)],
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_frontend_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.frontend_tools = tools;
        self
    }

    pub fn with_environment(mut self, lines: Vec<String>) -> Self {
        self.environment = lines;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// Answer, question for the user, or a terminal model response
    Stop,
    /// The step budget ran out
    Length,
    /// The caller cancelled the turn
    Aborted,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// The result of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub message: Message,
    pub finish_reason: FinishReason,
    pub steps: usize,
}

impl TurnOutcome {
    pub fn content(&self) -> &str {
        &self.message.content
    }

    /// True when the turn stopped to ask the user something.
    pub fn is_question(&self) -> bool {
        self.message.kind() == Some("ask")
    }
}
