//! Decoder for OpenAI-compatible `text/event-stream` chat completions.
//!
//! The decoder is a plain state machine with no I/O: the provider feeds it
//! byte chunks as they arrive off the wire (chunk boundaries fall anywhere,
//! including inside a line or inside a multi-byte character) and collects the
//! assembled turn with [`StreamDecoder::finish`].
//!
//! Framing: bytes are buffered until a `\n` completes a line. Each complete
//! line is trimmed; only lines starting with `data:` are considered; the
//! `[DONE]` sentinel ends the stream without a parse; everything else is
//! parsed as JSON and silently skipped when that fails.

use std::collections::BTreeMap;

use marginalia_core::message::MessageToolCall;
use marginalia_core::provider::{
    CompletionResult, Delta, DeltaSink, FinishReason, ToolCallDelta, Usage,
};
use memchr::memchr;
use serde::Deserialize;
use tracing::{trace, warn};

/// Payload that terminates a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// Incremental decoder for one streamed model turn.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Bytes of the current, not yet newline-terminated line
    buffer: Vec<u8>,
    text: String,
    fragments: BTreeMap<u32, ToolCallFragment>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

/// A tool call still being assembled from stream fragments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ToolCallFragment {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallFragment {
    fn apply(&mut self, delta: &ToolCallDelta) {
        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            self.id = id.to_string();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = function.name.as_deref().filter(|n| !n.is_empty()) {
                self.name = name.to_string();
            }
            if let Some(arguments) = &function.arguments {
                self.arguments.push_str(arguments);
            }
        }
    }

    fn into_tool_call(self) -> MessageToolCall {
        MessageToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal sentinel has been seen. Anything pushed after
    /// that is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of the response body, emitting a delta to `sink` for
    /// every meaningful event completed by it.
    pub fn push(&mut self, chunk: &[u8], sink: &mut DeltaSink<'_>) {
        if self.done {
            return;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.process_line(&line[..newline], sink);
            if self.done {
                self.buffer.clear();
                return;
            }
        }
    }

    /// Close the stream and assemble the turn.
    ///
    /// A final line without a trailing newline is still decoded. Tool calls
    /// come out in ascending index order with their argument strings exactly
    /// as accumulated.
    pub fn finish(mut self, sink: &mut DeltaSink<'_>) -> CompletionResult {
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.process_line(&rest, sink);
        }

        let tool_calls = std::mem::take(&mut self.fragments)
            .into_values()
            .map(ToolCallFragment::into_tool_call)
            .collect();

        CompletionResult {
            content: (!self.text.is_empty()).then_some(self.text),
            tool_calls,
            finish_reason: self.finish_reason.unwrap_or_default(),
            usage: self.usage,
        }
    }

    fn process_line(&mut self, line: &[u8], sink: &mut DeltaSink<'_>) {
        let Ok(line) = std::str::from_utf8(line) else {
            trace!("Ignoring SSE line with invalid UTF-8");
            return;
        };
        let Some(payload) = data_payload(line) else {
            return;
        };
        if payload == DONE_SENTINEL {
            self.done = true;
            return;
        }

        match serde_json::from_str::<StreamEvent>(payload) {
            Ok(event) => self.apply_event(event, sink),
            Err(e) => trace!(data = %payload, error = %e, "Ignoring unparseable SSE chunk"),
        }
    }

    fn apply_event(&mut self, event: StreamEvent, sink: &mut DeltaSink<'_>) {
        if let Some(error) = event.error {
            warn!(error = %error, "Endpoint reported an error inside the stream");
        }
        if let Some(usage) = event.usage {
            self.usage = Some(usage.into());
        }

        let Some(choice) = event.choices.into_iter().next() else {
            return;
        };

        let finish_reason = choice.finish_reason.as_deref().map(FinishReason::from);
        if let Some(reason) = &finish_reason {
            self.finish_reason = Some(reason.clone());
        }

        let wire = choice.delta.unwrap_or_default();
        let content = wire.content.filter(|c| !c.is_empty());
        if let Some(content) = &content {
            self.text.push_str(content);
        }

        let tool_calls = wire.tool_calls.filter(|tc| !tc.is_empty());
        if let Some(entries) = &tool_calls {
            for entry in entries {
                self.fragments.entry(entry.index).or_default().apply(entry);
            }
        }

        let delta = Delta {
            content,
            tool_calls,
            finish_reason,
        };
        if !delta.is_empty() {
            sink(&delta);
        }
    }
}

/// Extract the payload of a `data:` line, or `None` for any other line.
fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    line.strip_prefix(DATA_PREFIX).map(str::trim)
}

// --- Wire types ---

/// A single SSE `data: {...}` event from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}
