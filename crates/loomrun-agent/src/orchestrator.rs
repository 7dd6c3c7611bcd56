//! Run orchestrator.
//!
//! Serves one `run` request end to end: looks up (or builds) the thread's
//! graph, starts it fresh or resumes it after an approval, translates its
//! steps into protocol events and finishes with exactly one terminal item.
//!
//! ```text
//! run(input) ──► RUN_STARTED
//!                 │  interrupted?  yes ─► need tool result ─► mark APPROVED ─► resume
//!                 │                no  ─► InputBuilder ─────────────────────► start
//!                 ▼
//!            graph steps ──► EventTranslator ──► TEXT_MESSAGE_*
//!                 │
//!                 ├─ completed   ─► flag = false ─────────────────────► RUN_FINISHED
//!                 ├─ interrupted ─► flag = true ─► TOOL_CALL_* per approval ─► RUN_FINISHED
//!                 └─ error       ─► close open block ─► Err(e)
//! ```
//!
//! Work happens on a spawned task that feeds a bounded channel, so graph
//! stepping and model calls never run on the consumer's task.  The stream is
//! cold: nothing is spawned until it is first polled.  Dropping it cancels
//! the task at its next suspension point.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use loomrun_protocol::{ProtocolEvent, RunInput};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::approval::{build_resume_marker, extract_approvals};
use crate::error::{AgentError, BoxError, Result};
use crate::graph::{GraphEngine, GraphStep, RunConfig, Suspension};
use crate::input::InputBuilder;
use crate::registry::ThreadRegistry;
use crate::translator::EventTranslator;

/// Buffered events between the run task and its consumer.
const CHANNEL_CAPACITY: usize = 64;

/// Ordered events of one run.  The last item is `RUN_FINISHED` or an `Err`.
pub type RunStream = BoxStream<'static, Result<ProtocolEvent>>;

type EventSender = mpsc::Sender<Result<ProtocolEvent>>;

// ---------------------------------------------------------------------------
// Run phases
// ---------------------------------------------------------------------------

/// Lifecycle of a single run, as logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Running,
    Interrupted,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Running => "running",
            Self::Interrupted => "interrupted",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How graph stepping stopped.
enum Outcome {
    Completed,
    Interrupted(Suspension),
    /// The consumer went away mid-run.
    Abandoned,
}

/// The consumer dropped the run stream.
struct Abandoned;

async fn emit(tx: &EventSender, event: ProtocolEvent) -> std::result::Result<(), Abandoned> {
    tx.send(Ok(event)).await.map_err(|_| Abandoned)
}

/// Unwrap an [`AgentError`] that a graph node raised through the engine, so
/// its code survives; wrap anything else.
fn graph_error(source: BoxError) -> AgentError {
    match source.downcast::<AgentError>() {
        Ok(agent) => *agent,
        Err(source) => AgentError::Graph { source },
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives graph runs for any number of threads.
///
/// Cheap to clone; clones share the thread registry.  At most one run per
/// thread may be in flight; callers serialize runs of the same thread.
#[derive(Clone)]
pub struct RunOrchestrator {
    engine: Arc<dyn GraphEngine>,
    input_builder: Arc<dyn InputBuilder>,
    registry: ThreadRegistry,
    idle_ttl: Option<Duration>,
}

impl RunOrchestrator {
    pub fn new(engine: Arc<dyn GraphEngine>, input_builder: Arc<dyn InputBuilder>) -> Self {
        Self {
            engine,
            input_builder,
            registry: ThreadRegistry::new(),
            idle_ttl: None,
        }
    }

    /// Share an existing registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ThreadRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Evict threads idle for `ttl` (never interrupted ones) whenever a run
    /// starts or [`sweep_idle_threads`](Self::sweep_idle_threads) is called.
    #[must_use]
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = Some(ttl);
        self
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    /// Apply the idle TTL now.  Returns how many threads were evicted.
    pub fn sweep_idle_threads(&self) -> usize {
        self.idle_ttl
            .map(|ttl| self.registry.evict_idle(ttl))
            .unwrap_or(0)
    }

    /// Start a run.  Nothing happens until the returned stream is polled.
    pub fn run(&self, input: RunInput) -> RunStream {
        let this = self.clone();

        stream::once(async move {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            tokio::spawn(this.drive(input, tx));
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        })
        .flatten()
        .boxed()
    }

    /// Like [`run`](Self::run), with a failure turned into a terminal
    /// `RUN_ERROR` event.  This is what goes on the wire.
    pub fn run_to_wire(&self, input: RunInput) -> BoxStream<'static, ProtocolEvent> {
        self.run(input)
            .map(|item| match item {
                Ok(event) => event,
                Err(e) => ProtocolEvent::run_error(e.to_string(), e.code()),
            })
            .boxed()
    }

    async fn drive(self, input: RunInput, tx: EventSender) {
        let span = info_span!("run", thread_id = %input.thread_id, run_id = %input.run_id);

        tokio::select! {
            _ = tx.closed() => {
                warn!(parent: &span, "run abandoned by consumer");
            }
            _ = self.execute(&input, &tx).instrument(span.clone()) => {}
        }
    }

    async fn execute(&self, input: &RunInput, tx: &EventSender) {
        self.sweep_idle_threads();

        debug!(phase = %RunPhase::NotStarted, "run accepted");
        if emit(tx, ProtocolEvent::run_started(&input.thread_id, &input.run_id))
            .await
            .is_err()
        {
            return;
        }
        info!(phase = %RunPhase::Running, messages = input.messages.len(), "run started");

        let mut translator = EventTranslator::new();
        let result = self.step_graph(input, tx, &mut translator).await;

        // Whatever happened, never leave a text block open.
        for event in translator.finish() {
            if emit(tx, event).await.is_err() {
                return;
            }
        }

        match result {
            Ok(Outcome::Completed) => {
                self.registry.set_interrupted(&input.thread_id, false);
                info!(phase = %RunPhase::Completed, "run finished");
                let _ = emit(tx, ProtocolEvent::run_finished(&input.thread_id, &input.run_id)).await;
            }
            Ok(Outcome::Interrupted(suspension)) => {
                self.registry.set_interrupted(&input.thread_id, true);
                let approvals = extract_approvals(&suspension);
                info!(
                    phase = %RunPhase::Interrupted,
                    node = %suspension.node_id,
                    approvals = approvals.len(),
                    "run suspended awaiting approval"
                );
                if approvals.is_empty() {
                    warn!(node = %suspension.node_id, "suspension proposed no tool calls");
                }

                for approval in approvals {
                    let triple = [
                        ProtocolEvent::tool_call_start(&approval.tool_id, &approval.tool_name),
                        ProtocolEvent::tool_call_args(&approval.tool_id, approval.tool_args_json),
                        ProtocolEvent::tool_call_end(&approval.tool_id),
                    ];
                    for event in triple {
                        if emit(tx, event).await.is_err() {
                            return;
                        }
                    }
                }
                let _ = emit(tx, ProtocolEvent::run_finished(&input.thread_id, &input.run_id)).await;
            }
            Ok(Outcome::Abandoned) => {}
            Err(e) => {
                error!(phase = %RunPhase::Failed, code = e.code(), error = %e, "run failed");
                let _ = tx.send(Err(e)).await;
            }
        }
    }

    /// Prepare the graph and forward its steps until it stops.
    async fn step_graph(
        &self,
        input: &RunInput,
        tx: &EventSender,
        translator: &mut EventTranslator,
    ) -> Result<Outcome> {
        let thread_id = input.thread_id.as_str();
        let resuming = self.registry.is_interrupted(thread_id);

        if resuming && !input.has_result_message() {
            return Err(AgentError::ApprovalPrecondition {
                thread_id: thread_id.to_owned(),
            });
        }

        let config = RunConfig::for_thread(thread_id);
        let engine = Arc::clone(&self.engine);
        let handle = self
            .registry
            .get_or_build(thread_id, || async {
                engine
                    .compile(&config)
                    .await
                    .map_err(|source| AgentError::Construction {
                        thread_id: thread_id.to_owned(),
                        source,
                    })
            })
            .await?;

        let (initial, config) = if resuming {
            let marker = build_resume_marker();
            debug!(property = marker.property, value = marker.value, "resuming from checkpoint");
            let config = handle
                .update_state(config, marker.into_partial_state())
                .await
                .map_err(graph_error)?;
            (None, config)
        } else {
            (Some(self.input_builder.build(input)?), config)
        };

        let mut steps = handle.stream(initial, config).await.map_err(graph_error)?;
        while let Some(step) = steps.next().await {
            match step.map_err(graph_error)? {
                GraphStep::Output(output) => {
                    for event in translator.on_step(output)? {
                        if emit(tx, event).await.is_err() {
                            return Ok(Outcome::Abandoned);
                        }
                    }
                }
                GraphStep::Interrupted(suspension) => return Ok(Outcome::Interrupted(suspension)),
                GraphStep::Completed(_) => return Ok(Outcome::Completed),
            }
        }
        Ok(Outcome::Completed)
    }
}

impl fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("threads", &self.registry.len())
            .field("idle_ttl", &self.idle_ttl)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
