//! # Marginalia Core
//!
//! Domain types, traits, and error definitions for the Marginalia
//! tool-calling chat agent. This crate defines the model that the provider,
//! tool and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping the chat-completion backend
//! - Easy testing with scripted providers and stub tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentConfig;
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    CompletionResult, Delta, DeltaSink, FinishReason, Provider, ProviderRequest, ToolCallDelta,
    ToolDefinition, Usage,
};
pub use tool::{Tool, ToolRegistry};
pub use tokio_util::sync::CancellationToken;
