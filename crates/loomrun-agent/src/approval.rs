//! Human-in-the-loop approval bridge.
//!
//! When a graph suspends, the tool calls its last assistant message proposed
//! become [`Approval`]s that the client must act on.  Resuming sets a fixed
//! routing marker in the checkpointed state; the client's actual answer
//! travels separately as a tool result message in the next run's input.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::graph::Suspension;
use crate::llm::types::ToolCall;

/// State property the graph's conditional routing reads after a resume.
pub const APPROVAL_RESULT_PROPERTY: &str = "approval_result";

/// Value of [`APPROVAL_RESULT_PROPERTY`] that lets execution continue.
pub const APPROVED: &str = "APPROVED";

/// One pending tool call awaiting client action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    /// Never blank.
    pub tool_id: String,
    pub tool_name: String,
    /// Compact JSON arguments.
    pub tool_args_json: String,
}

impl From<&ToolCall> for Approval {
    fn from(call: &ToolCall) -> Self {
        let tool_id = if call.id.trim().is_empty() {
            Uuid::now_v7().to_string()
        } else {
            call.id.clone()
        };
        // Some providers hand back the raw argument string; forward it as is.
        let tool_args_json = match &call.arguments {
            Value::String(raw) => raw.clone(),
            Value::Null => "{}".to_owned(),
            other => other.to_string(),
        };
        Self {
            tool_id,
            tool_name: call.name.clone(),
            tool_args_json,
        }
    }
}

/// The fixed partial-state update applied before resuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeMarker {
    pub property: &'static str,
    pub value: &'static str,
}

impl ResumeMarker {
    pub fn into_partial_state(self) -> Map<String, Value> {
        let mut partial = Map::new();
        partial.insert(self.property.to_owned(), Value::String(self.value.to_owned()));
        partial
    }
}

/// Map the pending tool calls of a suspension to approvals, in proposal
/// order.  Empty when the last assistant message proposed nothing.
pub fn extract_approvals(suspension: &Suspension) -> Vec<Approval> {
    suspension
        .state
        .last_assistant_message()
        .map(|msg| msg.tool_calls.iter().map(Approval::from).collect())
        .unwrap_or_default()
}

pub fn build_resume_marker() -> ResumeMarker {
    ResumeMarker {
        property: APPROVAL_RESULT_PROPERTY,
        value: APPROVED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphState;
    use crate::llm::types::Message;
    use serde_json::json;

    fn suspended(messages: Vec<Message>) -> Suspension {
        Suspension {
            node_id: "approval".into(),
            state: GraphState::new(messages),
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn maps_each_tool_call_in_order() {
        let s = suspended(vec![
            Message::user("return my shirt"),
            Message::assistant_tool_calls(vec![
                call("t1", "showForm", json!({})),
                call("t2", "lookupOrder", json!({"orderId": "42"})),
            ]),
        ]);

        let approvals = extract_approvals(&s);
        assert_eq!(approvals.len(), 2);
        assert_eq!(
            approvals[0],
            Approval {
                tool_id: "t1".into(),
                tool_name: "showForm".into(),
                tool_args_json: "{}".into(),
            }
        );
        assert_eq!(approvals[1].tool_args_json, r#"{"orderId":"42"}"#);
    }

    #[test]
    fn blank_ids_are_replaced_with_distinct_uuids() {
        let s = suspended(vec![Message::assistant_tool_calls(vec![
            call("", "a", json!({})),
            call("  ", "b", json!({})),
        ])]);

        let approvals = extract_approvals(&s);
        assert!(Uuid::parse_str(&approvals[0].tool_id).is_ok());
        assert!(Uuid::parse_str(&approvals[1].tool_id).is_ok());
        assert_ne!(approvals[0].tool_id, approvals[1].tool_id);
    }

    #[test]
    fn raw_string_arguments_pass_through() {
        let s = suspended(vec![Message::assistant_tool_calls(vec![call(
            "t1",
            "showForm",
            Value::String("{\"type\":\"return\"}".into()),
        )])]);
        assert_eq!(extract_approvals(&s)[0].tool_args_json, "{\"type\":\"return\"}");
    }

    #[test]
    fn no_tool_calls_means_no_approvals() {
        let s = suspended(vec![Message::user("hi"), Message::assistant("just text")]);
        assert!(extract_approvals(&s).is_empty());
        assert!(extract_approvals(&suspended(Vec::new())).is_empty());
    }

    #[test]
    fn resume_marker_is_fixed_sentinel() {
        let partial = build_resume_marker().into_partial_state();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial["approval_result"], "APPROVED");
    }
}
