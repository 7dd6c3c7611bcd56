//! Agent run orchestration for loomrun.
//!
//! A run request comes in as a [`RunInput`](loomrun_protocol::RunInput); the
//! orchestrator finds or builds the thread's graph, drives it and streams the
//! result back as protocol events.  Graph nodes reach language models through
//! a [`FallbackModelChain`], which retries transient failures once and then
//! moves on to the next model.
//!
//! ```text
//!  RunInput ──► RunOrchestrator ──► ThreadRegistry ──► GraphHandle
//!                    │                                    │
//!                    │  ◄──────── GraphStep stream ───────┘
//!                    ▼
//!             EventTranslator / approvals ──► ProtocolEvent stream
//!
//!  graph nodes ──► FallbackModelChain ──► ModelBackend (OpenAI-compatible)
//!                        │
//!                  ErrorClassifier
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] -- Run lifecycle, resume handling, event emission.
//! - [`registry`] -- Per-thread graph handles and interruption flags.
//! - [`translator`] -- Graph step outputs to text message events.
//! - [`approval`] -- Suspended tool calls to approvals, resume marker.
//! - [`graph`] -- The graph engine seam.
//! - [`input`] -- Initial graph state from a run request.
//! - [`llm`] -- Model backends, error classification, fallback chain.
//! - [`config`] -- TOML configuration.
//! - [`error`] -- Agent error types.

pub mod approval;
pub mod config;
pub mod error;
pub mod graph;
pub mod input;
pub mod llm;
pub mod orchestrator;
pub mod registry;
pub mod translator;
pub mod util;

pub use approval::{
    APPROVAL_RESULT_PROPERTY, APPROVED, Approval, ResumeMarker, build_resume_marker,
    extract_approvals,
};
pub use config::LoomrunConfig;
pub use error::{AgentError, BoxError, ModelError, Result};
pub use graph::{
    GraphEngine, GraphHandle, GraphState, GraphStep, NodeEvent, RunConfig, StepOutput,
    StepStream, Suspension,
};
pub use input::{InputBuilder, TranscriptInputBuilder};
pub use llm::{
    ErrorClass, FallbackModelChain, LlmResponse, ModelBackend, OpenAiBackend, OpenAiConfig,
    Prompt, classify,
};
pub use orchestrator::{RunOrchestrator, RunPhase, RunStream};
pub use registry::{ThreadEntry, ThreadRegistry};
pub use translator::EventTranslator;
