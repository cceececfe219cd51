//! Reasoning oracle boundary
//!
//! Every judgment call (decomposition, capability evaluation, answering) is
//! delegated to a [`ReasoningOracle`]. Two implementations ship with the
//! crate:
//!
//! ```text
//! ┌──────────────────┐   complete / complete_streaming   ┌──────────────┐
//! │ Evaluator        │ ─────────────────────────────────▶│  HttpOracle  │──▶ /chat/completions
//! │ Decomposer       │                                    ├──────────────┤
//! │ AgentRunner      │                                    │ScriptedOracle│──▶ in-process replies
//! │ Mediator         │                                    └──────────────┘
//! └──────────────────┘
//! ```

pub mod http;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use http::{HttpOracle, OracleConfig};
pub use scripted::ScriptedOracle;

/// Errors from oracle calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle request failed: {0}")]
    Request(String),

    /// The oracle answered, but not in the requested format
    #[error("Oracle reply could not be parsed: {0}")]
    Parse(String),

    #[error("Oracle stream failed: {0}")]
    Stream(String),
}

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Stream of text fragments produced by a streaming completion
pub type TextStream = BoxStream<'static, OracleResult<String>>;

/// Shared reference to an oracle
pub type SharedOracle = Arc<dyn ReasoningOracle>;

/// Conversation role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of the conversation history sent to the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on `tool` messages to correlate the result with its call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `assistant` messages that requested tools
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// Tool catalog entry offered to the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    /// Ask the oracle to answer with a single JSON object
    pub strict_json: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn json(messages: Vec<Message>) -> Self {
        Self {
            messages,
            strict_json: true,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// A non-streamed oracle answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OracleReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl OracleReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// External reasoning backend
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Single-shot completion, possibly requesting tool calls
    async fn complete(&self, request: CompletionRequest) -> OracleResult<OracleReply>;

    /// Streamed completion yielding text fragments in order
    async fn complete_streaming(&self, request: CompletionRequest) -> OracleResult<TextStream>;
}

/// Parse a strict-JSON reply, tolerating a surrounding markdown fence
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(content: &str) -> OracleResult<T> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| OracleError::Parse(format!("{e}: {}", truncate(body, 200))))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
