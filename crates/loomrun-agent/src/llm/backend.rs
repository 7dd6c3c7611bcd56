//! The model backend seam.
//!
//! A backend is one concrete language-model client.  Backends report raw
//! errors; classification and fallback are the job of
//! [`super::FallbackModelChain`].

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{BoxError, ModelError};
use crate::llm::types::{LlmResponse, Prompt};

/// Text fragments as produced by a single backend.
pub type RawFragmentStream = BoxStream<'static, std::result::Result<String, BoxError>>;

/// Text fragments as produced by a fallback chain, with classified errors.
pub type FragmentStream = BoxStream<'static, std::result::Result<String, ModelError>>;

/// A language-model client that can be placed in a fallback chain.
///
/// Returned streams must not borrow from `self` or the prompt; a backend
/// clones whatever it needs before returning.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Start a streaming completion.
    ///
    /// Failing here, or on any stream item, counts as a failed attempt of
    /// this backend.
    async fn stream_invoke(&self, prompt: &Prompt)
    -> std::result::Result<RawFragmentStream, BoxError>;

    /// Run a completion to the end and return the whole response.
    async fn invoke(&self, prompt: &Prompt) -> std::result::Result<LlmResponse, BoxError>;
}
