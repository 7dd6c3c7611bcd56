//! Input messages.
//!
//! Messages arrive as role-discriminated JSON objects.  Text roles map to
//! [`TextMessage`], the `tool` role maps to [`ResultMessage`] (the answer to
//! a previously emitted tool call), and a role-less object carrying a `name`
//! is an [`ActionExecutionMessage`].  Unknown fields are ignored so newer
//! clients keep working; missing mandatory fields are hard errors.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Author of a [`TextMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

impl Role {
    /// Parse a wire role name.  Returns `None` for `tool` and unknown roles.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "developer" => Some(Self::Developer),
            _ => None,
        }
    }

    /// The lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Developer => "developer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Message variants
// ---------------------------------------------------------------------------

/// Plain conversational text from a user, assistant, system or developer.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub role: Role,
    pub content: String,
    pub parent_message_id: Option<String>,
}

/// A tool invocation previously proposed by the assistant, echoed back by
/// the client as part of the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionExecutionMessage {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub parent_message_id: Option<String>,
}

/// The client's answer to a tool call (for example a submitted form).
///
/// Its presence is what allows a suspended thread to resume.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    /// The tool call id this result answers (`toolCallId` on the wire).
    pub action_execution_id: String,
    /// The tool name (`name` on the wire), when the client sends it.
    pub action_name: Option<String>,
    /// The raw result payload (`content` on the wire).
    pub result: String,
}

/// A single message of a run's input transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(TextMessage),
    ActionExecution(ActionExecutionMessage),
    Result(ResultMessage),
}

impl Message {
    /// Create a user text message stamped with the current time.
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::text(id, Role::User, content)
    }

    /// Create a text message with the given role.
    pub fn text(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self::Text(TextMessage {
            id: id.into(),
            created_at: Some(Utc::now()),
            role,
            content: content.into(),
            parent_message_id: None,
        })
    }

    /// Create a tool result message answering `tool_call_id`.
    pub fn tool_result(
        id: impl Into<String>,
        tool_call_id: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self::Result(ResultMessage {
            id: id.into(),
            created_at: Some(Utc::now()),
            action_execution_id: tool_call_id.into(),
            action_name: None,
            result: result.into(),
        })
    }

    /// The message id.  Always present.
    pub fn id(&self) -> &str {
        match self {
            Self::Text(m) => &m.id,
            Self::ActionExecution(m) => &m.id,
            Self::Result(m) => &m.id,
        }
    }

    /// When the client created the message, if it said so.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text(m) => m.created_at,
            Self::ActionExecution(m) => m.created_at,
            Self::Result(m) => m.created_at,
        }
    }

    /// Parse a message from a JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawMessage = serde_json::from_value(value)?;
        Self::try_from(raw)
    }
}

// ---------------------------------------------------------------------------
// Wire decoding
// ---------------------------------------------------------------------------

/// Permissive shape every inbound message is first decoded into.  All fields
/// are optional here; [`Message::try_from`] enforces what each variant needs.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    role: Option<String>,
    content: Option<String>,
    parent_message_id: Option<String>,
    name: Option<String>,
    arguments: Option<Map<String, Value>>,
    tool_call_id: Option<String>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self> {
        let id = raw.id.ok_or(ProtocolError::MissingField { field: "id" })?;

        match raw.role.as_deref() {
            Some("tool") => {
                let action_execution_id = raw
                    .tool_call_id
                    .ok_or(ProtocolError::MissingField { field: "toolCallId" })?;
                Ok(Self::Result(ResultMessage {
                    id,
                    created_at: raw.created_at,
                    action_execution_id,
                    action_name: raw.name,
                    result: raw.content.unwrap_or_default(),
                }))
            }
            Some(other) => {
                let role = Role::parse(other).ok_or_else(|| ProtocolError::UnknownRole {
                    role: other.to_owned(),
                })?;
                Ok(Self::Text(TextMessage {
                    id,
                    created_at: raw.created_at,
                    role,
                    content: raw.content.unwrap_or_default(),
                    parent_message_id: raw.parent_message_id,
                }))
            }
            None => match raw.name {
                Some(name) => Ok(Self::ActionExecution(ActionExecutionMessage {
                    id,
                    created_at: raw.created_at,
                    name,
                    arguments: raw.arguments.unwrap_or_default(),
                    parent_message_id: raw.parent_message_id,
                })),
                None => Err(ProtocolError::Undiscriminated { id }),
            },
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;
        Self::try_from(raw).map_err(de::Error::custom)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", self.id())?;
        if let Some(created_at) = self.created_at() {
            map.serialize_entry("createdAt", &created_at)?;
        }
        match self {
            Self::Text(m) => {
                map.serialize_entry("role", &m.role)?;
                map.serialize_entry("content", &m.content)?;
                if let Some(parent) = &m.parent_message_id {
                    map.serialize_entry("parentMessageId", parent)?;
                }
            }
            Self::ActionExecution(m) => {
                map.serialize_entry("name", &m.name)?;
                map.serialize_entry("arguments", &m.arguments)?;
                if let Some(parent) = &m.parent_message_id {
                    map.serialize_entry("parentMessageId", parent)?;
                }
            }
            Self::Result(m) => {
                map.serialize_entry("role", "tool")?;
                map.serialize_entry("toolCallId", &m.action_execution_id)?;
                if let Some(name) = &m.action_name {
                    map.serialize_entry("name", name)?;
                }
                map.serialize_entry("content", &m.result)?;
            }
        }
        map.end()
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
    fn user_role_decodes_to_text_message() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "user",
            "content": "Hello",
        }))
        .unwrap();

        match msg {
            Message::Text(t) => {
                assert_eq!(t.id, "m1");
                assert_eq!(t.role, Role::User);
                assert_eq!(t.content, "Hello");
                assert!(t.created_at.is_none());
            }
            other => panic!("expected text message, got {other:?}"),
        }
    }

    #[test]
    fn tool_role_decodes_to_result_message() {
        let msg: Message = serde_json::from_value(json!({
            "id": "r1",
            "role": "tool",
            "toolCallId": "t1",
            "name": "showForm",
            "content": "{\"productName\":\"shirt\"}",
        }))
        .unwrap();

        match msg {
            Message::Result(r) => {
                assert_eq!(r.action_execution_id, "t1");
                assert_eq!(r.action_name.as_deref(), Some("showForm"));
                assert!(r.result.contains("shirt"));
            }
            other => panic!("expected result message, got {other:?}"),
        }
    }

    #[test]
    fn roleless_named_object_is_action_execution() {
        let msg: Message = serde_json::from_value(json!({
            "id": "a1",
            "name": "showForm",
            "arguments": {"type": "return"},
        }))
        .unwrap();

        match msg {
            Message::ActionExecution(a) => {
                assert_eq!(a.name, "showForm");
                assert_eq!(a.arguments["type"], "return");
            }
            other => panic!("expected action execution, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "content": "ok",
            "toolCalls": [],
            "somethingNew": {"nested": true},
        }))
        .unwrap();
        assert_eq!(msg.id(), "m1");
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = serde_json::from_value::<Message>(json!({
            "role": "user",
            "content": "Hello",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("`id`"));
    }

    #[test]
    fn tool_message_without_tool_call_id_is_rejected() {
        let err = serde_json::from_value::<Message>(json!({
            "id": "r1",
            "role": "tool",
            "content": "{}",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("toolCallId"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = Message::from_value(json!({"id": "x", "role": "narrator"})).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownRole { .. }));
    }

    #[test]
    fn roleless_nameless_object_is_rejected() {
        let err = Message::from_value(json!({"id": "x", "content": "?"})).unwrap_err();
        assert!(matches!(err, ProtocolError::Undiscriminated { .. }));
    }

    #[test]
    fn result_message_serializes_with_tool_role() {
        let msg = Message::tool_result("r1", "t1", "{}");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["toolCallId"], "t1");
        assert_eq!(v["content"], "{}");
    }

    #[test]
    fn created_at_accepts_rfc3339() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "system",
            "createdAt": "2025-01-02T03:04:05Z",
        }))
        .unwrap();
        assert!(msg.created_at().is_some());
    }
}
