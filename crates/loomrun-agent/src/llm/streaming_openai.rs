//! SSE stream handling for the Chat Completions API.
//!
//! The server sends `data:` lines whose JSON payloads carry
//! `choices[0].delta` objects, terminated by `data: [DONE]`.  Three layers:
//!
//! - [`LineBuffer`] splits raw body chunks into complete lines.  It buffers
//!   bytes, not text, so a multi-byte character split across two chunks is
//!   reassembled before decoding.
//! - [`OpenAiStreamAccumulator`] interprets one line at a time, returning
//!   text deltas and assembling tool-call fragments.
//! - [`sse_text_stream`] glues both onto a body byte stream and yields the
//!   text deltas as a fragment stream.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::error::BoxError;
use crate::llm::backend::RawFragmentStream;
use crate::llm::openai::OpenAiError;
use crate::llm::types::{LlmResponse, ToolCall, Usage};

type ParseResult<T> = std::result::Result<T, OpenAiError>;

// ---------------------------------------------------------------------------
// Line splitting
// ---------------------------------------------------------------------------

/// Reassembles newline-terminated lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> ParseResult<Vec<String>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..pos])?);
        }
        Ok(lines)
    }

    /// Return the unterminated tail, if any, once the body has ended.
    pub fn finish(&mut self) -> ParseResult<Option<String>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.pending);
        decode_line(&raw).map(Some)
    }
}

fn decode_line(raw: &[u8]) -> ParseResult<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8(raw.to_vec()).map_err(|e| OpenAiError::Parse {
        reason: format!("invalid UTF-8 in stream: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Accumulates `data:` lines into a complete response.
///
/// Text deltas are concatenated.  Tool-call deltas are correlated by their
/// `index`: the id and name usually arrive in the first chunk, argument
/// fragments in the following ones.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    text: String,
    tool_calls: Vec<PartialToolCall>,
    done: bool,
    usage: Usage,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Interpret one SSE line.  Returns the text delta it carried, if any.
    /// Blank lines, comments and non-`data` fields are ignored.
    pub fn feed_line(&mut self, line: &str) -> ParseResult<Option<String>> {
        let Some(data) = line.trim_end().strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(None);
        }

        let v: Value = serde_json::from_str(data).map_err(|e| OpenAiError::Parse {
            reason: format!("invalid JSON in SSE data: {e}"),
        })?;

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            self.usage = parse_usage(usage);
        }

        let delta = &v["choices"][0]["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                self.feed_tool_call(call);
            }
        }

        match delta["content"].as_str() {
            Some(content) => {
                self.text.push_str(content);
                Ok(Some(content.to_owned()))
            }
            None => Ok(None),
        }
    }

    fn feed_tool_call(&mut self, call: &Value) {
        let index = call["index"].as_u64().unwrap_or(0) as usize;
        if self.tool_calls.len() <= index {
            self.tool_calls.resize_with(index + 1, PartialToolCall::default);
        }
        let partial = &mut self.tool_calls[index];

        if let Some(id) = call["id"].as_str() {
            partial.id = id.to_owned();
        }
        let function = &call["function"];
        if let Some(name) = function["name"].as_str() {
            partial.name.push_str(name);
        }
        if let Some(args) = function["arguments"].as_str() {
            partial.arguments.push_str(args);
        }
    }

    /// Produce the final response.  Tool calls win over text, as in the
    /// non-streaming API.
    pub fn into_response(self) -> ParseResult<LlmResponse> {
        if self.tool_calls.is_empty() {
            return Ok(LlmResponse::Text(self.text));
        }

        self.tool_calls
            .into_iter()
            .map(|partial| {
                Ok(ToolCall {
                    arguments: parse_arguments(&partial.name, &partial.arguments)?,
                    id: partial.id,
                    name: partial.name,
                })
            })
            .collect::<ParseResult<Vec<_>>>()
            .map(LlmResponse::ToolCalls)
    }
}

/// Decode a tool call's argument string.  An empty string is an empty
/// object.
pub(crate) fn parse_arguments(tool: &str, raw: &str) -> ParseResult<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|e| OpenAiError::Parse {
        reason: format!("invalid JSON in tool call `{tool}` arguments: {e}"),
    })
}

pub(crate) fn parse_usage(v: &Value) -> Usage {
    Usage {
        input_tokens: v["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: v["completion_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

// ---------------------------------------------------------------------------
// Body stream -> fragment stream
// ---------------------------------------------------------------------------

struct SseState<S> {
    body: S,
    lines: LineBuffer,
    acc: OpenAiStreamAccumulator,
    ready: VecDeque<String>,
    failure: Option<BoxError>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Feed lines until one fails or `[DONE]` is seen.
    fn absorb(&mut self, lines: Vec<String>) {
        for line in lines {
            match self.acc.feed_line(&line) {
                Ok(Some(delta)) if !delta.is_empty() => self.ready.push_back(delta),
                Ok(_) => {}
                Err(e) => {
                    self.failure = Some(Box::new(e));
                    self.finished = true;
                    return;
                }
            }
            if self.acc.is_done() {
                self.finished = true;
                return;
            }
        }
    }
}

/// Turn an SSE response body into a stream of text deltas.
///
/// Deltas already decoded are delivered before a later failure.  The
/// stream ends at `[DONE]` or at the end of the body, whichever is first.
pub fn sse_text_stream<S, B, E>(body: S) -> RawFragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        body,
        lines: LineBuffer::new(),
        acc: OpenAiStreamAccumulator::new(),
        ready: VecDeque::new(),
        failure: None,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.ready.pop_front() {
                return Some((Ok(delta), st));
            }
            if let Some(err) = st.failure.take() {
                return Some((Err(err), st));
            }
            if st.finished {
                tracing::trace!(usage = ?st.acc.usage(), "sse stream finished");
                return None;
            }

            match st.body.next().await {
                Some(Ok(chunk)) => match st.lines.push(chunk.as_ref()) {
                    Ok(lines) => st.absorb(lines),
                    Err(e) => {
                        st.failure = Some(Box::new(e));
                        st.finished = true;
                    }
                },
                Some(Err(e)) => {
                    st.failure = Some(Box::new(OpenAiError::Stream {
                        source: Box::new(e),
                    }));
                    st.finished = true;
                }
                None => {
                    match st.lines.finish() {
                        Ok(Some(tail)) => st.absorb(vec![tail]),
                        Ok(None) => {}
                        Err(e) => st.failure = Some(Box::new(e)),
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
