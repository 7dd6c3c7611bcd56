//! Retry-then-fallback invocation over an ordered list of backends.
//!
//! Both invocation styles share one algorithm, starting at index 0:
//!
//! 1. Invoke `models[i]`.  On success, forward its output unchanged.
//! 2. On a transient failure, wait one backoff unit and retry `models[i]`
//!    exactly once.  If the retry fails too (whatever its class), move on;
//!    with no model left, the retry's error propagates.
//! 3. On a permanent failure, move on immediately; with no model left, the
//!    original error propagates.
//!
//! For streams, a failure anywhere in the stream counts as a failed attempt,
//! including one after fragments have been forwarded.  Those fragments stay
//! delivered and the next attempt's output follows them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, warn};

use crate::error::{AgentError, BoxError, ModelError, Result};
use crate::llm::backend::{FragmentStream, ModelBackend, RawFragmentStream};
use crate::llm::classifier::{ErrorClass, classify};
use crate::llm::types::{LlmResponse, Prompt};

/// Backoff before the single retry of a transiently failing model.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// An ordered, non-empty chain of model backends.
///
/// Cheap to clone; clones share the backend list.
#[derive(Clone)]
pub struct FallbackModelChain {
    models: Arc<[Arc<dyn ModelBackend>]>,
    retry_delay: Duration,
}

impl std::fmt::Debug for FallbackModelChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackModelChain")
            .field("models", &self.names())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

/// Position in the chain: the current model and whether it was retried.
#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    index: usize,
    retried: bool,
}

/// What to do after a failed attempt.
enum Decision {
    /// Back off, then call the same model again.
    Retry,
    /// Call the next model right away.
    Advance,
    Exhausted(ModelError),
}

impl FallbackModelChain {
    /// Build a chain.  Fails with [`AgentError::EmptyModelChain`] when
    /// `models` is empty.
    pub fn new(models: Vec<Arc<dyn ModelBackend>>) -> Result<Self> {
        if models.is_empty() {
            return Err(AgentError::EmptyModelChain);
        }
        Ok(Self {
            models: models.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Override the backoff before a retry.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Backend names in fallback order.
    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name()).collect()
    }

    /// Invoke the chain and wait for a complete response.
    ///
    /// The backoff is an async sleep: the calling task waits, the runtime
    /// thread does not.
    pub async fn invoke(&self, prompt: &Prompt) -> std::result::Result<LlmResponse, ModelError> {
        let mut cursor = Cursor::default();
        loop {
            let model = Arc::clone(&self.models[cursor.index]);
            let source = match model.invoke(prompt).await {
                Ok(response) => {
                    debug!(
                        style = "invoke",
                        model_index = cursor.index,
                        backend = %model.name(),
                        "model call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => e,
            };
            match self.decide("invoke", &mut cursor, source) {
                Decision::Retry => tokio::time::sleep(self.retry_delay).await,
                Decision::Advance => {}
                Decision::Exhausted(e) => return Err(e),
            }
        }
    }

    /// Invoke the chain as a stream of text fragments.
    ///
    /// The returned stream is lazy: no backend is contacted until it is first
    /// polled.  Dropping it abandons any pending backoff timer or in-flight
    /// request.
    pub fn stream_invoke(&self, prompt: &Prompt) -> FragmentStream {
        let state = StreamState {
            chain: self.clone(),
            prompt: prompt.clone(),
            cursor: Cursor::default(),
            current: None,
            backoff: false,
            delivered: 0,
            done: false,
        };
        stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        })
        .boxed()
    }

    /// Record a failed attempt at `cursor` and decide how to continue.
    fn decide(&self, style: &'static str, cursor: &mut Cursor, source: BoxError) -> Decision {
        let name = self.models[cursor.index].name().to_owned();

        if !cursor.retried && classify(&*source) == ErrorClass::Transient {
            warn!(
                style,
                model_index = cursor.index,
                backend = %name,
                error = %source,
                delay_ms = self.retry_delay.as_millis() as u64,
                "transient model failure, retrying once"
            );
            cursor.retried = true;
            return Decision::Retry;
        }

        // The retry's own class is recorded but never earns a second retry.
        let failure = if cursor.retried {
            classified(&name, source)
        } else {
            ModelError::Permanent {
                backend: name.clone(),
                source,
            }
        };

        cursor.index += 1;
        cursor.retried = false;
        if cursor.index >= self.models.len() {
            warn!(style, backend = %name, error = %failure, "model chain exhausted");
            return Decision::Exhausted(failure);
        }
        warn!(
            style,
            failed = %name,
            next = %self.models[cursor.index].name(),
            model_index = cursor.index,
            error = %failure,
            "falling back to next model"
        );
        Decision::Advance
    }
}

/// Progress of one streamed chain invocation.
struct StreamState {
    chain: FallbackModelChain,
    prompt: Prompt,
    cursor: Cursor,
    /// The open attempt, if any.
    current: Option<RawFragmentStream>,
    /// Sleep before opening the next attempt.
    backoff: bool,
    /// Fragments forwarded by the current attempt.
    delivered: usize,
    done: bool,
}

impl StreamState {
    async fn next_item(&mut self) -> Option<std::result::Result<String, ModelError>> {
        loop {
            if self.done {
                return None;
            }

            let source = match self.current.as_mut() {
                Some(fragments) => match fragments.next().await {
                    Some(Ok(fragment)) => {
                        self.delivered += 1;
                        return Some(Ok(fragment));
                    }
                    Some(Err(e)) => e,
                    None => {
                        debug!(
                            style = "stream",
                            model_index = self.cursor.index,
                            fragments = self.delivered,
                            "model stream completed"
                        );
                        self.done = true;
                        return None;
                    }
                },
                None => {
                    if std::mem::take(&mut self.backoff) {
                        tokio::time::sleep(self.chain.retry_delay).await;
                    }
                    let model = Arc::clone(&self.chain.models[self.cursor.index]);
                    match model.stream_invoke(&self.prompt).await {
                        Ok(fragments) => {
                            self.current = Some(fragments);
                            self.delivered = 0;
                            continue;
                        }
                        Err(e) => e,
                    }
                }
            };

            if self.current.take().is_some() && self.delivered > 0 {
                warn!(
                    model_index = self.cursor.index,
                    fragments = self.delivered,
                    "model stream failed after partial output"
                );
            }
            match self.chain.decide("stream", &mut self.cursor, source) {
                Decision::Retry => self.backoff = true,
                Decision::Advance => {}
                Decision::Exhausted(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn classified(backend: &str, source: BoxError) -> ModelError {
    let backend = backend.to_owned();
    match classify(&*source) {
        ErrorClass::Transient => ModelError::Transient { backend, source },
        ErrorClass::Permanent => ModelError::Permanent { backend, source },
    }
}

// ---------------------------------------------------------------------------
// A chain is itself a backend
// ---------------------------------------------------------------------------

#[async_trait]
impl ModelBackend for FallbackModelChain {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    async fn stream_invoke(
        &self,
        prompt: &Prompt,
    ) -> std::result::Result<RawFragmentStream, BoxError> {
        Ok(FallbackModelChain::stream_invoke(self, prompt)
            .map_err(BoxError::from)
            .boxed())
    }

    async fn invoke(&self, prompt: &Prompt) -> std::result::Result<LlmResponse, BoxError> {
        FallbackModelChain::invoke(self, prompt)
            .await
            .map_err(BoxError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl ModelBackend for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn stream_invoke(
            &self,
            _prompt: &Prompt,
        ) -> std::result::Result<RawFragmentStream, BoxError> {
            Ok(stream::iter(vec![Ok("a".to_owned()), Ok("b".to_owned())]).boxed())
        }

        async fn invoke(&self, _prompt: &Prompt) -> std::result::Result<LlmResponse, BoxError> {
            Ok(LlmResponse::Text(self.0.to_owned()))
        }
    }

    #[test]
    fn empty_chain_is_rejected() {
        let err = FallbackModelChain::new(Vec::new()).unwrap_err();
        assert!(matches!(err, AgentError::EmptyModelChain));
    }

    #[test]
    fn default_retry_delay_is_one_second() {
        let chain = FallbackModelChain::new(vec![Arc::new(Fixed("a"))]).unwrap();
        assert_eq!(chain.retry_delay(), Duration::from_secs(1));
        assert_eq!(chain.names(), ["a"]);
        assert!(!chain.is_empty());
    }

    #[tokio::test]
    async fn first_healthy_model_answers() {
        let chain =
            FallbackModelChain::new(vec![Arc::new(Fixed("primary")), Arc::new(Fixed("backup"))])
                .unwrap();
        let response = chain.invoke(&Prompt::default()).await.unwrap();
        assert_eq!(response.text(), Some("primary"));
    }

    #[tokio::test]
    async fn chain_nests_as_a_backend() {
        let inner = FallbackModelChain::new(vec![Arc::new(Fixed("inner"))]).unwrap();
        let outer = FallbackModelChain::new(vec![Arc::new(inner)]).unwrap();

        let fragments: Vec<String> = outer
            .stream_invoke(&Prompt::default())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, ["a", "b"]);
    }
}
