//! A single-node chat graph backed by the model chain.
//!
//! Each thread keeps its conversation in an in-memory checkpoint.  A run
//! appends the new input to it, streams the chain's answer as fragments and
//! completes with the answer recorded.  The graph never suspends.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use loomrun_agent::llm::{FragmentStream, Message, Prompt, Role};
use loomrun_agent::{
    AgentError, BoxError, FallbackModelChain, GraphEngine, GraphHandle, GraphState, GraphStep,
    RunConfig, StepStream,
};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Compiles one [`ChatGraph`] per thread.
pub struct ChatGraphEngine {
    chain: FallbackModelChain,
}

impl ChatGraphEngine {
    pub fn new(chain: FallbackModelChain) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl GraphEngine for ChatGraphEngine {
    async fn compile(&self, config: &RunConfig) -> Result<Arc<dyn GraphHandle>, BoxError> {
        debug!(thread_id = %config.thread_id, models = ?self.chain.names(), "compiling chat graph");
        Ok(Arc::new(ChatGraph {
            chain: self.chain.clone(),
            checkpoint: Arc::new(Mutex::new(GraphState::default())),
        }))
    }
}

pub struct ChatGraph {
    chain: FallbackModelChain,
    checkpoint: Arc<Mutex<GraphState>>,
}

/// Progress of one streamed answer.
struct Turn {
    fragments: FragmentStream,
    answer: String,
    /// Taken once the turn has ended.
    state: Option<GraphState>,
    checkpoint: Arc<Mutex<GraphState>>,
}

#[async_trait]
impl GraphHandle for ChatGraph {
    async fn stream(
        &self,
        initial: Option<GraphState>,
        _config: RunConfig,
    ) -> Result<StepStream, BoxError> {
        let state = {
            let mut checkpoint = self.checkpoint.lock().await;
            if let Some(initial) = initial {
                // The system prompt is only taken from a thread's first input.
                let fresh = checkpoint.messages.is_empty();
                checkpoint.messages.extend(
                    initial
                        .messages
                        .into_iter()
                        .filter(|m| fresh || m.role != Role::System),
                );
                checkpoint.values.extend(initial.values);
            }
            checkpoint.clone()
        };

        let turn = Turn {
            fragments: self.chain.stream_invoke(&Prompt::new(state.messages.clone())),
            answer: String::new(),
            state: Some(state),
            checkpoint: Arc::clone(&self.checkpoint),
        };

        Ok(stream::unfold(turn, |mut turn| async move {
            let mut state = turn.state.take()?;
            match turn.fragments.next().await {
                Some(Ok(fragment)) => {
                    turn.answer.push_str(&fragment);
                    turn.state = Some(state);
                    Some((Ok(GraphStep::fragment(fragment)), turn))
                }
                Some(Err(e)) => Some((Err(BoxError::from(AgentError::from(e))), turn)),
                None => {
                    state
                        .messages
                        .push(Message::assistant(std::mem::take(&mut turn.answer)));
                    *turn.checkpoint.lock().await = state.clone();
                    Some((Ok(GraphStep::Completed(state)), turn))
                }
            }
        })
        .boxed())
    }

    async fn update_state(
        &self,
        mut config: RunConfig,
        partial: Map<String, Value>,
    ) -> Result<RunConfig, BoxError> {
        self.checkpoint.lock().await.values.extend(partial);
        config.checkpoint_id = Some(Uuid::now_v7().to_string());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomrun_agent::llm::{LlmResponse, RawFragmentStream};
    use loomrun_agent::{ModelBackend, RunOrchestrator, TranscriptInputBuilder};
    use loomrun_protocol::{EventKind, Message as WireMessage, ProtocolEvent, RunInput};

    struct Echo;

    #[async_trait]
    impl ModelBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn stream_invoke(&self, prompt: &Prompt) -> Result<RawFragmentStream, BoxError> {
            let turns = prompt.messages.iter().filter(|m| m.role == Role::User).count();
            Ok(stream::iter(vec![Ok("echo ".to_owned()), Ok(format!("#{turns}"))]).boxed())
        }

        async fn invoke(&self, _prompt: &Prompt) -> Result<LlmResponse, BoxError> {
            Ok(LlmResponse::Text("echo".into()))
        }
    }

    fn orchestrator() -> RunOrchestrator {
        let chain = FallbackModelChain::new(vec![Arc::new(Echo)]).unwrap();
        RunOrchestrator::new(
            Arc::new(ChatGraphEngine::new(chain)),
            Arc::new(TranscriptInputBuilder::new().with_system_prompt("Be brief.")),
        )
    }

    fn input(run: &str, text: &str) -> RunInput {
        RunInput::new("thread", run, vec![WireMessage::user(run, text)])
    }

    #[tokio::test]
    async fn streams_answer_as_one_text_block() {
        let events: Vec<ProtocolEvent> = orchestrator().run_to_wire(input("r1", "hi")).collect().await;
        let kinds: Vec<EventKind> = events.iter().map(ProtocolEvent::kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::RunStarted,
                EventKind::TextMessageStart,
                EventKind::TextMessageContent,
                EventKind::TextMessageContent,
                EventKind::TextMessageEnd,
                EventKind::RunFinished,
            ]
        );
    }

    #[tokio::test]
    async fn thread_history_accumulates_across_runs() {
        let orch = orchestrator();
        let _: Vec<_> = orch.run_to_wire(input("r1", "hi")).collect().await;
        let events: Vec<ProtocolEvent> = orch.run_to_wire(input("r2", "again")).collect().await;

        assert!(events.contains(&ProtocolEvent::TextMessageContent {
            message_id: events[1].correlation_id().unwrap().to_owned(),
            delta: "#2".into(),
        }));
    }
}
