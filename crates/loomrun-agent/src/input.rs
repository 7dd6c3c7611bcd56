//! Building a graph's initial state from a run request.

use loomrun_protocol::RunInput;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::graph::GraphState;
use crate::llm::types::Message;
use crate::util::{LOG_PREVIEW_CHARS, truncate_for_log};

/// Turns a fresh [`RunInput`] into the graph's initial state.
///
/// Domain-specific: prompt assembly, intent detection and the like belong
/// in implementations of this trait.
pub trait InputBuilder: Send + Sync {
    fn build(&self, input: &RunInput) -> Result<GraphState>;
}

/// Default builder: an optional system prompt, the latest user message, then
/// every tool result the client sent (typically submitted form data).
///
/// Earlier turns are not replayed; the graph's checkpoint already holds the
/// conversation history for an existing thread.
#[derive(Debug, Clone, Default)]
pub struct TranscriptInputBuilder {
    system_prompt: Option<String>,
}

impl TranscriptInputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }
}

impl InputBuilder for TranscriptInputBuilder {
    fn build(&self, input: &RunInput) -> Result<GraphState> {
        let user = input.last_user_message().ok_or_else(|| AgentError::Input {
            reason: format!("thread `{}` has no user message", input.thread_id),
        })?;

        debug!(
            thread_id = %input.thread_id,
            message = %truncate_for_log(&user.content, LOG_PREVIEW_CHARS),
            "last user message"
        );

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(user.content.clone()));

        for result in input.result_messages() {
            debug!(
                thread_id = %input.thread_id,
                tool_call_id = %result.action_execution_id,
                result = %truncate_for_log(&result.result, LOG_PREVIEW_CHARS),
                "tool result in input"
            );
            messages.push(Message::tool_result(
                result.action_execution_id.clone(),
                result.result.clone(),
            ));
        }

        Ok(GraphState::new(messages))
    }
}
