//! Graph step outputs to protocol events.
//!
//! One translator per run tracks whether a text block is open:
//!
//! - A fragment opens a block if none is open, then adds content.
//! - A node event that arrives while a block is open ends that block and
//!   nothing else; the node's payload is the output the fragments streamed.
//! - A node event with no block open emits a block of its own (start,
//!   optional content, end).
//! - [`EventTranslator::finish`] closes whatever is still open.

use loomrun_protocol::ProtocolEvent;
use serde_json::Value;
use tracing::trace;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::graph::{NodeEvent, StepOutput};

/// Per-run translation state.
#[derive(Debug, Default)]
pub struct EventTranslator {
    open_block: Option<String>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the currently open text block.
    pub fn open_block(&self) -> Option<&str> {
        self.open_block.as_deref()
    }

    /// Translate one step output into zero or more events.
    pub fn on_step(&mut self, output: StepOutput) -> Result<Vec<ProtocolEvent>> {
        match output {
            StepOutput::Fragment(text) => Ok(self.on_fragment(text)),
            StepOutput::Node(event) => self.on_node(event),
        }
    }

    /// Close an open block, if any.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        self.open_block
            .take()
            .map(|id| {
                trace!(message_id = %id, "closing text block");
                vec![ProtocolEvent::text_end(id)]
            })
            .unwrap_or_default()
    }

    fn on_fragment(&mut self, text: String) -> Vec<ProtocolEvent> {
        let mut events = Vec::with_capacity(2);
        let id = match &self.open_block {
            Some(id) => id.clone(),
            None => {
                let id = new_message_id();
                trace!(message_id = %id, "opening text block");
                events.push(ProtocolEvent::text_start(id.clone()));
                self.open_block = Some(id.clone());
                id
            }
        };
        if !text.is_empty() {
            events.push(ProtocolEvent::text_content(id, text));
        }
        events
    }

    fn on_node(&mut self, event: NodeEvent) -> Result<Vec<ProtocolEvent>> {
        if self.open_block.is_some() {
            trace!(node = %event.node, "node event ends streamed block");
            return Ok(self.finish());
        }

        let text = renderable_text(&event)?;
        trace!(node = %event.node, has_text = text.is_some(), "node event");

        let id = new_message_id();
        let mut events = vec![ProtocolEvent::text_start(id.clone())];
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            events.push(ProtocolEvent::text_content(id.clone(), text));
        }
        events.push(ProtocolEvent::text_end(id));
        Ok(events)
    }
}

/// Text a node payload carries: a string is itself, an object its `text`
/// or `content` field.  Arrays and scalars have no defined rendering.
fn renderable_text(event: &NodeEvent) -> Result<Option<String>> {
    match &event.payload {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Object(map) => Ok(["text", "content"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_owned)),
        other => Err(AgentError::Translation {
            reason: format!(
                "node `{}` produced a {} payload",
                event.node,
                json_kind(other)
            ),
        }),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Time-ordered, unique per block.
fn new_message_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomrun_protocol::EventKind;
    use serde_json::json;

    fn kinds(events: &[ProtocolEvent]) -> Vec<EventKind> {
        events.iter().map(ProtocolEvent::kind).collect()
    }

    fn fragment(t: &str) -> StepOutput {
        StepOutput::Fragment(t.into())
    }

    fn node(payload: Value) -> StepOutput {
        StepOutput::Node(NodeEvent::new("agent", payload))
    }

    #[test]
    fn fragments_share_one_block() {
        let mut tr = EventTranslator::new();
        let first = tr.on_step(fragment("Hi")).unwrap();
        let second = tr.on_step(fragment(" there")).unwrap();

        assert_eq!(kinds(&first), [EventKind::TextMessageStart, EventKind::TextMessageContent]);
        assert_eq!(kinds(&second), [EventKind::TextMessageContent]);
        assert_eq!(first[0].correlation_id(), second[0].correlation_id());

        let end = tr.finish();
        assert_eq!(kinds(&end), [EventKind::TextMessageEnd]);
        assert_eq!(end[0].correlation_id(), first[0].correlation_id());
        assert!(tr.finish().is_empty());
    }

    #[test]
    fn empty_fragment_opens_without_content() {
        let mut tr = EventTranslator::new();
        let events = tr.on_step(fragment("")).unwrap();
        assert_eq!(kinds(&events), [EventKind::TextMessageStart]);
        assert!(tr.open_block().is_some());
    }

    #[test]
    fn node_event_ends_open_streamed_block() {
        let mut tr = EventTranslator::new();
        let opened = tr.on_step(fragment("Hi")).unwrap();
        let events = tr.on_step(node(Value::Null)).unwrap();

        assert_eq!(kinds(&events), [EventKind::TextMessageEnd]);
        assert_eq!(events[0].correlation_id(), opened[0].correlation_id());
        assert!(tr.open_block().is_none());
        assert!(tr.finish().is_empty());
    }

    #[test]
    fn node_payload_is_not_rendered_while_a_block_is_open() {
        let mut tr = EventTranslator::new();
        tr.on_step(fragment("Order ")).unwrap();
        tr.on_step(fragment("found")).unwrap();

        // The node's payload repeats the streamed answer; even one with no
        // rendering only ends the block.
        let events = tr.on_step(node(json!([1, 2]))).unwrap();
        assert_eq!(kinds(&events), [EventKind::TextMessageEnd]);

        let next = tr.on_step(node(json!("next node"))).unwrap();
        assert_eq!(
            kinds(&next),
            [
                EventKind::TextMessageStart,
                EventKind::TextMessageContent,
                EventKind::TextMessageEnd
            ]
        );
    }

    #[test]
    fn node_text_is_rendered_inside_its_block() {
        let mut tr = EventTranslator::new();
        let events = tr.on_step(node(json!({"content": "Order found"}))).unwrap();
        assert_eq!(
            events[1],
            ProtocolEvent::text_content(events[0].correlation_id().unwrap(), "Order found")
        );

        let events = tr.on_step(node(json!("plain"))).unwrap();
        assert_eq!(events.len(), 3);

        let events = tr.on_step(node(json!({"other": 1}))).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn uninterpretable_payload_is_a_translation_error() {
        let mut tr = EventTranslator::new();
        for payload in [json!([1, 2]), json!(3), json!(true)] {
            let err = tr.on_step(node(payload)).unwrap_err();
            assert!(matches!(err, AgentError::Translation { .. }));
        }
    }

    #[test]
    fn block_ids_are_distinct() {
        let mut tr = EventTranslator::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let events = tr.on_step(node(Value::Null)).unwrap();
            ids.push(events[0].correlation_id().unwrap().to_owned());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }
}
