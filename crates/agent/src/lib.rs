//! The agent loop for Marginalia.
//!
//! A run follows a **call → dispatch → observe** cycle:
//!
//! 1. **Install** the system prompt at the head of the conversation
//! 2. **Send** the conversation and tool schemas to the model
//! 3. **If tool calls**: execute them in order, append results, loop back to step 2
//! 4. **If text only**: return it to the caller
//!
//! The loop stops at the first tool-free turn, at the iteration ceiling, or
//! when the caller's cancellation token fires.

pub mod loop_runner;
pub mod outcome;
pub mod stream_event;

pub use loop_runner::AgentLoop;
pub use outcome::{AgentError, AgentOutcome, EXHAUSTED_MESSAGE};
pub use stream_event::{AgentStreamEvent, EventSink};
