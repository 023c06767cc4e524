//! Tool trait: the abstraction over locally-defined capabilities.
//!
//! Tools are what let the remote model act before it answers. A failing tool
//! is conversational information for the model, not a system failure, so the
//! registry turns every miss or fault into an error payload string.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The core Tool trait.
///
/// Each tool validates its own arguments and returns its result as text.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calc").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given argument object.
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A name-keyed registry of available tools.
///
/// Registration is expected to finish before any run that uses the registry;
/// once shared behind an `Arc`, lookups and executions hold no per-call state
/// and may run concurrently.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "Replaced previously registered tool");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// The declarative schema list attached to outgoing requests, sorted by
    /// tool name. Built fresh from the current contents on every call.
    pub fn to_schemas(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool by name.
    ///
    /// Unknown names, tool errors, and panics inside the tool all come back
    /// as an error payload (see [`ToolRegistry::error_payload`]).
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            return Self::error_payload(&ToolError::NotFound(name.to_string()));
        };

        match AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                Self::error_payload(&e)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".into());
                warn!(tool = %name, reason = %reason, "Tool panicked");
                Self::error_payload(&ToolError::ExecutionFailed {
                    tool_name: name.to_string(),
                    reason,
                })
            }
        }
    }

    /// Render an error as the payload handed back to the model.
    pub fn error_payload(error: &ToolError) -> String {
        serde_json::json!({ "error": error.to_string() }).to_string()
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            arguments["text"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
        }
    }

    struct ShoutTool;

    #[async_trait]
    impl Tool for ShoutTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input, loudly"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_uppercase())
        }
    }

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
            panic!("boom")
        }
    }

    fn error_message(payload: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(ShoutTool));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("echo").unwrap().description(),
            "Echoes back the input, loudly"
        );
    }

    #[test]
    fn schemas_reflect_current_contents() {
        let mut registry = ToolRegistry::new();
        assert!(registry.to_schemas().is_empty());

        registry.register(Arc::new(PanickyTool));
        registry.register(Arc::new(EchoTool));
        let defs = registry.to_schemas();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[1].name, "panicky");
        assert_eq!(defs[0].parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let out = registry
            .execute("echo", serde_json::json!({"text": "hello world"}))
            .await;
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn missing_tool_is_error_payload() {
        let registry = ToolRegistry::new();
        let out = registry.execute("nonexistent", serde_json::json!({})).await;
        assert!(error_message(&out).contains("nonexistent"));
    }

    #[tokio::test]
    async fn tool_error_is_error_payload() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let out = registry.execute("echo", serde_json::json!({})).await;
        assert!(error_message(&out).contains("missing 'text'"));
    }

    #[tokio::test]
    async fn tool_panic_is_error_payload() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanickyTool));
        let out = registry.execute("panicky", serde_json::json!({})).await;
        let message = error_message(&out);
        assert!(message.contains("panicky"));
        assert!(message.contains("boom"));
    }
}
