//! Collaborator interfaces for the computation-graph engine.
//!
//! The engine itself (nodes, edges, scheduling, checkpoint storage) lives
//! outside this crate.  The orchestrator only needs to compile a graph per
//! thread, stream its steps, and patch checkpointed state before a resume.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BoxError;
use crate::llm::types::{Message, Role};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Graph state as seen by the orchestrator: the model conversation plus
/// free-form channel values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl GraphState {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            values: Map::new(),
        }
    }

    /// The most recent assistant-authored message.
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}

/// Addresses one thread's checkpoint inside the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub thread_id: String,
    /// Set by the engine after a state update; `None` means "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl RunConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A completed node's output, opaque to the orchestrator apart from any
/// text it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvent {
    pub node: String,
    pub payload: Value,
}

impl NodeEvent {
    pub fn new(node: impl Into<String>, payload: Value) -> Self {
        Self {
            node: node.into(),
            payload,
        }
    }
}

/// Everything a running graph emits before it stops.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// An incremental chunk of streamed model text.
    Fragment(String),
    /// A node finished.
    Node(NodeEvent),
}

/// The graph stopped before its end node, waiting for approval.
#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    /// Node that requested the interruption.
    pub node_id: String,
    /// State at the checkpoint.
    pub state: GraphState,
}

/// One item of a graph execution stream.
///
/// A stream that ends without `Interrupted` or `Completed` counts as
/// completed.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphStep {
    Output(StepOutput),
    Interrupted(Suspension),
    Completed(GraphState),
}

impl GraphStep {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Output(StepOutput::Fragment(text.into()))
    }

    pub fn node(node: impl Into<String>, payload: Value) -> Self {
        Self::Output(StepOutput::Node(NodeEvent::new(node, payload)))
    }
}

pub type StepStream = BoxStream<'static, std::result::Result<GraphStep, BoxError>>;

// ---------------------------------------------------------------------------
// Engine traits
// ---------------------------------------------------------------------------

/// A compiled graph bound to checkpoint storage.
#[async_trait]
pub trait GraphHandle: Send + Sync {
    /// Start (`Some(state)`) or resume from the last checkpoint (`None`).
    async fn stream(
        &self,
        initial: Option<GraphState>,
        config: RunConfig,
    ) -> std::result::Result<StepStream, BoxError>;

    /// Merge `partial` into the checkpointed state and return the config
    /// addressing the updated checkpoint.
    async fn update_state(
        &self,
        config: RunConfig,
        partial: Map<String, Value>,
    ) -> std::result::Result<RunConfig, BoxError>;
}

/// Builds graph handles.  Called at most once per thread.
#[async_trait]
pub trait GraphEngine: Send + Sync {
    async fn compile(
        &self,
        config: &RunConfig,
    ) -> std::result::Result<Arc<dyn GraphHandle>, BoxError>;
}
