//! Backend for any OpenAI-compatible Chat Completions endpoint.
//!
//! Covers OpenAI itself, GitHub Models and a local Ollama server, which is
//! the usual shape of a fallback chain.  Errors are shaped for the
//! classifier: transport failures keep the [`reqwest::Error`] as their
//! source (so a refused connection is transient) and non-2xx responses carry
//! the status code in their text (so a `401` is permanent).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::BoxError;
use crate::llm::backend::{ModelBackend, RawFragmentStream};
use crate::llm::streaming_openai::{parse_arguments, parse_usage, sse_text_stream};
use crate::llm::types::{LlmResponse, Message, Prompt, Role, ToolCall, ToolDefinition};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures of a single Chat Completions call.
#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    /// The request never produced a response (refused, reset, timed out).
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("http {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The response body could not be interpreted.
    #[error("malformed response: {reason}")]
    Parse { reason: String },

    /// The SSE body broke off mid-stream.
    #[error("stream interrupted")]
    Stream {
        #[source]
        source: BoxError,
    },

    /// The backend was configured with an unusable value.
    #[error("invalid backend config: {reason}")]
    Config { reason: String },
}

type OpenAiResult<T> = std::result::Result<T, OpenAiError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Name used in logs and fallback decisions.
    pub name: String,
    /// API root, e.g. `https://api.openai.com/v1` or
    /// `http://localhost:11434/v1`.
    pub base_url: String,
    pub model: String,
    /// Bearer token.  Local servers usually need none.
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// A [`ModelBackend`] talking to one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: Arc<OpenAiConfig>,
    headers: HeaderMap,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> OpenAiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                OpenAiError::Config {
                    reason: format!("invalid api key for `{}`: {e}", config.name),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        // Only the connect phase is bounded at the client level; a streaming
        // body may legitimately outlive the request timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| OpenAiError::Config {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            headers,
            http,
        })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Build the JSON body for a Chat Completions request.
    fn request_body(&self, prompt: &Prompt, stream: bool) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages_to_openai(&prompt.messages),
        });

        if let Some(temp) = prompt.temperature.or(self.config.temperature) {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = prompt.max_tokens.or(self.config.max_tokens) {
            body["max_tokens"] = json!(max);
        }
        if !prompt.tools.is_empty() {
            body["tools"] = tools_to_openai(&prompt.tools);
        }
        if stream {
            body["stream"] = json!(true);
        }

        body
    }

    /// Send the request and reject non-success statuses.
    async fn send(&self, body: &Value, stream: bool) -> OpenAiResult<reqwest::Response> {
        let url = self.config.endpoint();
        debug!(
            backend = %self.config.name,
            url = %url,
            model = %self.config.model,
            stream,
            "sending model request"
        );

        let mut request = self.http.post(&url).headers(self.headers.clone()).json(body);
        if !stream {
            request = request.timeout(self.config.timeout);
        }

        let resp = request
            .send()
            .await
            .map_err(|source| OpenAiError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OpenAiError::Status {
                url,
                status: status.as_u16(),
                body: crate::util::truncate_for_log(&body, 200),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn stream_invoke(
        &self,
        prompt: &Prompt,
    ) -> std::result::Result<RawFragmentStream, BoxError> {
        let body = self.request_body(prompt, true);
        let resp = self.send(&body, true).await?;
        Ok(sse_text_stream(Box::pin(resp.bytes_stream())))
    }

    async fn invoke(&self, prompt: &Prompt) -> std::result::Result<LlmResponse, BoxError> {
        let body = self.request_body(prompt, false);
        let resp = self.send(&body, false).await?;

        let url = self.config.endpoint();
        let text = resp
            .text()
            .await
            .map_err(|source| OpenAiError::Transport { url, source })?;
        let v: Value = serde_json::from_str(&text).map_err(|e| OpenAiError::Parse {
            reason: format!("invalid JSON response: {e}"),
        })?;

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            let usage = parse_usage(usage);
            debug!(
                backend = %self.config.name,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "model usage"
            );
        }

        Ok(parse_openai_response(&v)?)
    }
}

// ===========================================================================
// Wire format conversion
// ===========================================================================

/// Convert messages to the Chat Completions format.  System messages stay
/// inline, tool calls go under `assistant.tool_calls` with stringified
/// arguments, and tool results use `role: "tool"`.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({"role": "system", "content": msg.content}),
            Role::User => json!({"role": "user", "content": msg.content}),
            Role::Assistant if msg.tool_calls.is_empty() => {
                json!({"role": "assistant", "content": msg.content})
            }
            Role::Assistant => {
                let tool_calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        let arguments = match &tc.arguments {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {"name": tc.name, "arguments": arguments},
                        })
                    })
                    .collect();

                let mut m = json!({"role": "assistant", "tool_calls": tool_calls});
                if !msg.content.is_empty() {
                    m["content"] = json!(msg.content);
                }
                m
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Wrap tool definitions as `{"type": "function", "function": {...}}`.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect(),
    )
}

/// Parse a non-streaming response.  Tool calls take precedence over text.
pub fn parse_openai_response(v: &Value) -> OpenAiResult<LlmResponse> {
    let message = &v["choices"][0]["message"];
    if message.is_null() {
        return Err(OpenAiError::Parse {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    if let Some(calls) = message["tool_calls"].as_array()
        && !calls.is_empty()
    {
        return calls
            .iter()
            .map(|tc| {
                let function = &tc["function"];
                let name = function["name"].as_str().unwrap_or_default().to_owned();
                let raw = function["arguments"].as_str().unwrap_or_default();
                Ok(ToolCall {
                    id: tc["id"].as_str().unwrap_or_default().to_owned(),
                    arguments: parse_arguments(&name, raw)?,
                    name,
                })
            })
            .collect::<OpenAiResult<Vec<_>>>()
            .map(LlmResponse::ToolCalls);
    }

    let content = message["content"].as_str().unwrap_or_default();
    Ok(LlmResponse::Text(content.to_owned()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::classifier::{ErrorClass, classify};

    fn backend() -> OpenAiBackend {
        let mut config = OpenAiConfig::new("ollama", "http://localhost:11434/v1/", "llama3.1");
        config.temperature = Some(0.2);
        OpenAiBackend::new(config).unwrap()
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(
            backend().config().endpoint(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn request_body_uses_backend_model_and_defaults() {
        let prompt = Prompt::from_user(Some("sys"), "hi");
        let body = backend().request_body(&prompt, true);

        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["stream"], true);
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn prompt_overrides_backend_settings() {
        let mut prompt = Prompt::from_user(None, "hi");
        prompt.max_tokens = Some(64);
        let body = backend().request_body(&prompt, false);
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn api_key_becomes_bearer_header() {
        let config = OpenAiConfig::new("openai", "https://api.openai.com/v1", "gpt-4o")
            .with_api_key("sk-test");
        let backend = OpenAiBackend::new(config).unwrap();
        assert_eq!(backend.headers[AUTHORIZATION], "Bearer sk-test");
    }

    #[test]
    fn assistant_tool_calls_are_stringified() {
        let messages = vec![Message::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "showForm".into(),
            arguments: json!({"type": "return"}),
        }])];
        let wire = messages_to_openai(&messages);

        let call = &wire[0]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        let args: Value = serde_json::from_str(call["function"]["arguments"].as_str().unwrap())
            .unwrap();
        assert_eq!(args["type"], "return");
        assert!(wire[0].get("content").is_none());
    }

    #[test]
    fn tool_result_keeps_call_id() {
        let wire = messages_to_openai(&[Message::tool_result("call_1", "{\"ok\":true}")]);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_1");
    }

    #[test]
    fn tools_are_wrapped_as_functions() {
        let wire = tools_to_openai(&[ToolDefinition {
            name: "showForm".into(),
            description: "Render a form".into(),
            input_schema: json!({"type": "object"}),
        }]);
        assert_eq!(wire[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn parses_text_and_tool_call_responses() {
        let text = json!({"choices": [{"message": {"role": "assistant", "content": "Hi"}}]});
        assert_eq!(parse_openai_response(&text).unwrap(), LlmResponse::Text("Hi".into()));

        let calls = json!({"choices": [{"message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "call_9", "type": "function",
                            "function": {"name": "showForm", "arguments": "{}"}}]
        }}]});
        match parse_openai_response(&calls).unwrap() {
            LlmResponse::ToolCalls(c) => assert_eq!(c[0].id, "call_9"),
            other => panic!("expected tool calls, got {other:?}"),
        }

        assert!(parse_openai_response(&json!({"choices": []})).is_err());
    }

    #[test]
    fn unauthorized_status_is_permanent() {
        let err = OpenAiError::Status {
            url: "https://api.openai.com/v1/chat/completions".into(),
            status: 401,
            body: "invalid api key".into(),
        };
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn gateway_timeout_text_is_transient() {
        let err = OpenAiError::Status {
            url: "http://proxy/v1/chat/completions".into(),
            status: 504,
            body: "upstream request timeout".into(),
        };
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        // Port 9 (discard) is closed on any sane test host.
        let config = OpenAiConfig::new("nowhere", "http://127.0.0.1:9/v1", "m");
        let err = OpenAiBackend::new(config)
            .unwrap()
            .invoke(&Prompt::from_user(None, "hi"))
            .await
            .unwrap_err();
        assert_eq!(classify(&*err), ErrorClass::Transient);
    }
}
