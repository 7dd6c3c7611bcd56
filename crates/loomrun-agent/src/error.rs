//! Agent error types.
//!
//! Run failures surface through [`AgentError`]; classified model failures
//! through [`ModelError`].  Every wrapping variant keeps the original error
//! as its `source()` so a boundary can walk the chain down to the root cause
//! (for example an `io::Error` of kind `ConnectionRefused`).

use std::error::Error as StdError;

/// Boxed error returned by external collaborators (model backends, graph
/// engines, input builders).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

/// A model invocation failure after classification.
///
/// Only escapes a fallback chain once every backend has been tried.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Network-level symptom; a retry might succeed.
    #[error("model `{backend}` failed transiently: {source}")]
    Transient {
        backend: String,
        #[source]
        source: BoxError,
    },

    /// Anything a retry will not fix (bad credentials, malformed request).
    #[error("model `{backend}` failed: {source}")]
    Permanent {
        backend: String,
        #[source]
        source: BoxError,
    },
}

impl ModelError {
    /// Name of the backend that produced the final failure.
    pub fn backend(&self) -> &str {
        match self {
            Self::Transient { backend, .. } | Self::Permanent { backend, .. } => backend,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

/// Unified error type for a run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Run errors ----------------------------------------------------------
    /// The graph handle for a thread could not be built.
    #[error("failed to build graph for thread `{thread_id}`: {source}")]
    Construction {
        thread_id: String,
        #[source]
        source: BoxError,
    },

    /// A suspended thread was resumed without a tool result in the input.
    #[error("thread `{thread_id}` is awaiting approval but the input carries no tool result")]
    ApprovalPrecondition { thread_id: String },

    /// A step output could not be turned into protocol events.
    #[error("cannot translate step output: {reason}")]
    Translation { reason: String },

    /// The graph engine failed while stepping or updating state.
    #[error("graph execution failed: {source}")]
    Graph {
        #[source]
        source: BoxError,
    },

    /// The initial graph state could not be built from the run input.
    #[error("invalid run input: {reason}")]
    Input { reason: String },

    // -- Model errors --------------------------------------------------------
    /// Every backend of a fallback chain failed.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A fallback chain was constructed with no backends.
    #[error("model chain must contain at least one backend")]
    EmptyModelChain,

    // -- Configuration errors ------------------------------------------------
    /// Configuration loading or validation failed.
    #[error("config error: {reason}")]
    Config { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An inbound protocol payload was malformed.
    #[error(transparent)]
    Protocol(#[from] loomrun_protocol::ProtocolError),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// The deepest error in the `source()` chain, or `self` when there is
    /// none.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Whether a [`ModelError`] appears anywhere in the chain, including
    /// one raised inside the graph.
    pub fn model_error(&self) -> Option<&ModelError> {
        // `Model` is transparent, so its own `source()` skips the wrapper.
        if let Self::Model(model) = self {
            return Some(model);
        }
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(model) = err.downcast_ref::<ModelError>() {
                return Some(model);
            }
            current = err.source();
        }
        None
    }

    /// Machine-readable code used when this error ends a run on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApprovalPrecondition { .. } => "APPROVAL_REQUIRED",
            Self::Construction { .. } => "CONSTRUCTION_ERROR",
            Self::Translation { .. } => "TRANSLATION_ERROR",
            Self::Model(_) | Self::EmptyModelChain => "MODEL_ERROR",
            _ if self.model_error().is_some() => "MODEL_ERROR",
            _ => "AGENT_ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
