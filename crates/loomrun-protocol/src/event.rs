//! Client-facing run events.
//!
//! Every event is one JSON object tagged by `type`.  Field names follow the
//! AG-UI vocabulary consumed by browser clients (`messageId`, `toolCallId`,
//! `delta`, ...).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::Role;

/// One event of a run's output sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolEvent {
    // -- Run lifecycle -----------------------------------------------------
    #[serde(rename_all = "camelCase")]
    RunStarted { thread_id: String, run_id: String },

    #[serde(rename_all = "camelCase")]
    RunFinished { thread_id: String, run_id: String },

    #[serde(rename_all = "camelCase")]
    RunError { message: String, code: String },

    // -- Text blocks -------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    TextMessageStart { message_id: String, role: Role },

    #[serde(rename_all = "camelCase")]
    TextMessageContent { message_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    TextMessageEnd { message_id: String },

    // -- Tool calls --------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
    },

    /// `delta` carries the complete JSON-encoded argument object.
    #[serde(rename_all = "camelCase")]
    ToolCallArgs { tool_call_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    ToolCallEnd { tool_call_id: String },
}

/// Discriminant of a [`ProtocolEvent`], for matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStarted,
    RunFinished,
    RunError,
    TextMessageStart,
    TextMessageContent,
    TextMessageEnd,
    ToolCallStart,
    ToolCallArgs,
    ToolCallEnd,
}

impl EventKind {
    /// The `type` tag written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "RUN_STARTED",
            Self::RunFinished => "RUN_FINISHED",
            Self::RunError => "RUN_ERROR",
            Self::TextMessageStart => "TEXT_MESSAGE_START",
            Self::TextMessageContent => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd => "TEXT_MESSAGE_END",
            Self::ToolCallStart => "TOOL_CALL_START",
            Self::ToolCallArgs => "TOOL_CALL_ARGS",
            Self::ToolCallEnd => "TOOL_CALL_END",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProtocolEvent {
    pub fn run_started(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunStarted {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_finished(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunFinished {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::RunError {
            message: message.into(),
            code: code.into(),
        }
    }

    /// Open an assistant text block.
    pub fn text_start(message_id: impl Into<String>) -> Self {
        Self::TextMessageStart {
            message_id: message_id.into(),
            role: Role::Assistant,
        }
    }

    pub fn text_content(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    pub fn text_end(message_id: impl Into<String>) -> Self {
        Self::TextMessageEnd {
            message_id: message_id.into(),
        }
    }

    pub fn tool_call_start(tool_call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_call_name: name.into(),
        }
    }

    pub fn tool_call_args(tool_call_id: impl Into<String>, args_json: impl Into<String>) -> Self {
        Self::ToolCallArgs {
            tool_call_id: tool_call_id.into(),
            delta: args_json.into(),
        }
    }

    pub fn tool_call_end(tool_call_id: impl Into<String>) -> Self {
        Self::ToolCallEnd {
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::RunStarted { .. } => EventKind::RunStarted,
            Self::RunFinished { .. } => EventKind::RunFinished,
            Self::RunError { .. } => EventKind::RunError,
            Self::TextMessageStart { .. } => EventKind::TextMessageStart,
            Self::TextMessageContent { .. } => EventKind::TextMessageContent,
            Self::TextMessageEnd { .. } => EventKind::TextMessageEnd,
            Self::ToolCallStart { .. } => EventKind::ToolCallStart,
            Self::ToolCallArgs { .. } => EventKind::ToolCallArgs,
            Self::ToolCallEnd { .. } => EventKind::ToolCallEnd,
        }
    }

    /// `RUN_FINISHED` and `RUN_ERROR` close a run; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    /// The text block or tool call this event belongs to, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::TextMessageStart { message_id, .. }
            | Self::TextMessageContent { message_id, .. }
            | Self::TextMessageEnd { message_id } => Some(message_id),
            Self::ToolCallStart { tool_call_id, .. }
            | Self::ToolCallArgs { tool_call_id, .. }
            | Self::ToolCallEnd { tool_call_id } => Some(tool_call_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_started_wire_shape() {
        let v = serde_json::to_value(ProtocolEvent::run_started("th", "r1")).unwrap();
        assert_eq!(v, json!({"type": "RUN_STARTED", "threadId": "th", "runId": "r1"}));
    }

    #[test]
    fn text_start_carries_assistant_role() {
        let v = serde_json::to_value(ProtocolEvent::text_start("m1")).unwrap();
        assert_eq!(
            v,
            json!({"type": "TEXT_MESSAGE_START", "messageId": "m1", "role": "assistant"})
        );
    }

    #[test]
    fn tool_call_fields_use_camel_case() {
        let v = serde_json::to_value(ProtocolEvent::tool_call_start("t1", "showForm")).unwrap();
        assert_eq!(v["type"], "TOOL_CALL_START");
        assert_eq!(v["toolCallId"], "t1");
        assert_eq!(v["toolCallName"], "showForm");

        let v = serde_json::to_value(ProtocolEvent::tool_call_args("t1", "{}")).unwrap();
        assert_eq!(v["delta"], "{}");
    }

    #[test]
    fn kind_matches_wire_tag() {
        let events = [
            ProtocolEvent::run_finished("th", "r"),
            ProtocolEvent::run_error("boom", "AGENT_ERROR"),
            ProtocolEvent::text_content("m", "x"),
            ProtocolEvent::text_end("m"),
            ProtocolEvent::tool_call_end("t"),
        ];
        for event in events {
            let v = serde_json::to_value(&event).unwrap();
            assert_eq!(v["type"], event.kind().as_str());
        }
    }

    #[test]
    fn only_finish_and_error_are_terminal() {
        assert!(ProtocolEvent::run_finished("th", "r").is_terminal());
        assert!(ProtocolEvent::run_error("m", "c").is_terminal());
        assert!(!ProtocolEvent::run_started("th", "r").is_terminal());
        assert!(!ProtocolEvent::tool_call_end("t").is_terminal());
    }

    #[test]
    fn correlation_id_links_blocks_and_calls() {
        assert_eq!(ProtocolEvent::text_content("m1", "x").correlation_id(), Some("m1"));
        assert_eq!(ProtocolEvent::tool_call_args("t1", "{}").correlation_id(), Some("t1"));
        assert_eq!(ProtocolEvent::run_started("a", "b").correlation_id(), None);
    }
}
