//! The run request envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Message, ResultMessage, Role, TextMessage};

/// Everything a client sends to start or resume one run of a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    /// The conversation this run belongs to.
    pub thread_id: String,
    /// Client-chosen identifier of this run.
    pub run_id: String,
    /// The ordered transcript, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Client-side shared state, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Client-declared tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Auxiliary context entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<Value>,
    /// Opaque properties forwarded by the client runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_props: Option<Value>,
}

impl RunInput {
    /// Create an input with just a transcript.
    pub fn new(
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            messages,
            state: None,
            tools: Vec::new(),
            context: Vec::new(),
            forwarded_props: None,
        }
    }

    /// The most recent user-authored text message.
    pub fn last_user_message(&self) -> Option<&TextMessage> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Text(t) if t.role == Role::User => Some(t),
            _ => None,
        })
    }

    /// The most recent tool result message.
    pub fn last_result_message(&self) -> Option<&ResultMessage> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Result(r) => Some(r),
            _ => None,
        })
    }

    /// Whether the transcript carries at least one tool result.
    pub fn has_result_message(&self) -> bool {
        self.last_result_message().is_some()
    }

    /// All tool result messages, in transcript order.
    pub fn result_messages(&self) -> impl Iterator<Item = &ResultMessage> {
        self.messages.iter().filter_map(|m| match m {
            Message::Result(r) => Some(r),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
