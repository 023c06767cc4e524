//! Agent-level streaming events.
//!
//! `AgentStreamEvent` lifts provider deltas and tool activity into events a
//! front end can render live (or forward over SSE/WebSocket as JSON).

use marginalia_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent during a run, in the order they happen.
///
/// - `chunk`: partial text token from the model
/// - `tool_call_pending`: the model has named a tool; arguments still streaming
/// - `tool_call`: the agent is invoking a tool
/// - `tool_result`: tool execution completed
/// - `done`: the run is complete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the model.
    Chunk { content: String },

    /// A tool name arrived for the call at `index` of the current turn.
    ToolCallPending { index: u32, name: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
    },

    /// The run is complete.
    Done {
        usage: Option<Usage>,
        iterations: u32,
        tool_calls_made: usize,
        exhausted: bool,
    },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::ToolCallPending { .. } => "tool_call_pending",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
        }
    }
}

/// Receives agent events synchronously as the run progresses.
pub type EventSink<'a> = dyn FnMut(AgentStreamEvent) + Send + 'a;
