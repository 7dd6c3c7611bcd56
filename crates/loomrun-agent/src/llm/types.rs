//! Core types for model interaction.
//!
//! Provider-agnostic at this layer; [`super::openai`] translates them into
//! the Chat Completions wire format.  The same [`Message`] type is what the
//! graph engine records in its state, which is how the approval bridge finds
//! the tool calls an assistant proposed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a model conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// Textual content.  Empty for assistant messages that only carry tool
    /// calls.
    #[serde(default)]
    pub content: String,

    /// Tool calls proposed by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call a [`Role::Tool`] message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message proposing tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl From<LlmResponse> for Message {
    fn from(response: LlmResponse) -> Self {
        match response {
            LlmResponse::Text(text) => Self::assistant(text),
            LlmResponse::ToolCalls(calls) => Self::assistant_tool_calls(calls),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model.  Some providers leave it blank.
    #[serde(default)]
    pub id: String,

    pub name: String,

    /// Arguments as a JSON value.  Usually an object; some providers send
    /// the raw argument string instead.
    #[serde(default)]
    pub arguments: Value,
}

/// A tool the model may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A complete (non-streamed) model response.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    /// The model produced a final text answer.
    Text(String),

    /// The model wants to invoke one or more tools.
    ToolCalls(Vec<ToolCall>),
}

impl LlmResponse {
    /// The text answer, if this is one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::ToolCalls(_) => None,
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Everything a backend needs for one invocation.  The model identifier is
/// a property of the backend, not of the prompt, so one prompt can be sent
/// unchanged down a fallback chain.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    /// Overrides the backend's configured temperature.
    pub temperature: Option<f32>,
    /// Overrides the backend's configured token limit.
    pub max_tokens: Option<u32>,
}

impl Prompt {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// A single user turn, optionally preceded by a system prompt.
    pub fn from_user(system: Option<&str>, user: impl Into<String>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user));
        Self::new(messages)
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
