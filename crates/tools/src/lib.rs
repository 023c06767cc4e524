//! Built-in tool implementations for Marginalia.
//!
//! These are small, self-contained capabilities useful for trying the agent
//! loop end to end; applications register their own tools next to them.

pub mod calculator;
pub mod clock;

use std::sync::Arc;

use marginalia_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use clock::CurrentTimeTool;

/// Create a tool registry with all built-in tools.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool));
    registry.register(Arc::new(CurrentTimeTool));
    registry
}
