//! Provider trait: the abstraction over chat-completion backends.
//!
//! A Provider knows how to send a conversation to a model and get a turn
//! back, either as one complete response or as a sequence of [`Delta`]s
//! delivered to a caller-supplied sink while the turn is assembled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The conversation messages, system message first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why the model stopped producing output for a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of the answer
    #[default]
    Stop,
    /// The model wants tools to run
    ToolCalls,
    /// Truncated by the token limit
    Length,
    /// Withheld by a content filter
    ContentFilter,
    /// Anything else the endpoint reports
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(s: &str) -> Self {
        match s {
            "stop" => Self::Stop,
            // Older endpoints still report the legacy function-call reason.
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FinishReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FinishReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

/// A partial tool call exactly as it arrived in one stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call within the turn; upstreams that send a single
    /// call sometimes leave it out
    #[serde(default)]
    pub index: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDelta>,
}

/// The function part of a [`ToolCallDelta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One decoded stream event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Text fragment (never empty when present)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Raw tool-call fragments, for live display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,

    /// Set when the model ended the turn in this event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.tool_calls.is_none() && self.finish_reason.is_none()
    }
}

/// A complete model turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Assembled text, `None` if the turn produced no text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Completed tool calls in index order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    pub finish_reason: FinishReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CompletionResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The text content, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Receives each decoded [`Delta`] synchronously, in wire order.
pub type DeltaSink<'a> = dyn FnMut(&Delta) + Send + 'a;

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `stream()` without knowing which
/// backend answers. Both must resolve to [`ProviderError::Cancelled`] as soon
/// as `cancel` fires, including while a request is in flight.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, ProviderError>;

    /// Send a request and decode the response incrementally, handing every
    /// delta to `sink` before returning the assembled turn.
    ///
    /// Default implementation calls `complete()` and replays the result as a
    /// single delta.
    async fn stream(
        &self,
        request: ProviderRequest,
        sink: &mut DeltaSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, ProviderError> {
        let result = self.complete(request, cancel).await?;
        let delta = replay_delta(&result);
        if !delta.is_empty() {
            sink(&delta);
        }
        Ok(result)
    }
}

/// Express a complete turn as the single delta a stream would have produced.
fn replay_delta(result: &CompletionResult) -> Delta {
    let tool_calls = (!result.tool_calls.is_empty()).then(|| {
        result
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, tc)| ToolCallDelta {
                index: i as u32,
                id: Some(tc.id.clone()),
                kind: Some("function".into()),
                function: Some(FunctionDelta {
                    name: Some(tc.name.clone()),
                    arguments: Some(tc.arguments.clone()),
                }),
            })
            .collect()
    });

    Delta {
        content: result.content.clone().filter(|c| !c.is_empty()),
        tool_calls,
        finish_reason: Some(result.finish_reason.clone()),
    }
}
