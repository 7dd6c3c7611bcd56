//! Model integration layer.
//!
//! - [`types`] -- Provider-agnostic messages, tool calls and prompts.
//! - [`backend`] -- The [`ModelBackend`] trait every client implements.
//! - [`classifier`] -- Transient versus permanent failure classification.
//! - [`fallback`] -- Retry-then-fallback over an ordered backend chain.
//! - [`openai`] -- HTTP client for OpenAI-compatible endpoints.
//! - [`streaming_openai`] -- SSE parsing for OpenAI-compatible streams.

pub mod backend;
pub mod classifier;
pub mod fallback;
pub mod openai;
pub mod streaming_openai;
pub mod types;

pub use backend::{FragmentStream, ModelBackend, RawFragmentStream};
pub use classifier::{ErrorClass, classify, classify_message};
pub use fallback::{DEFAULT_RETRY_DELAY, FallbackModelChain};
pub use openai::{OpenAiBackend, OpenAiConfig, OpenAiError};
pub use types::{LlmResponse, Message, Prompt, Role, ToolCall, ToolDefinition, Usage};
