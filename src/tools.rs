//! User-supplied tools.
//!
//! A [`Tool`] is an async callable the assistant can invoke through
//! function-call events. The [`ToolRegistry`] holds them by name,
//! produces the wire manifest advertised in the session configuration,
//! and resolves inbound calls. Tool failures become error payloads sent
//! back into the conversation, never crashes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::realtime::messages::ToolDef;

/// Errors from tool resolution or execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No registered tool has this name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The arguments payload was not valid JSON.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but failed.
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

/// An invocable function exposed to the assistant.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls this tool by.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool with parsed arguments.
    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Named collection of tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Wire manifest for the session configuration.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|tool| ToolDef::function(tool.name(), tool.description(), tool.parameters()))
            .collect()
    }

    /// Resolve and run a tool against a raw arguments string as it
    /// arrives off the wire.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args: Value = if arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };

        tool.invoke(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the arguments back"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
            Ok(json!({"echo": arguments}))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(Echo));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_definitions_manifest() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].tool_type, "function");
        assert!(defs[0].parameters.is_some());
    }

    #[tokio::test]
    async fn test_invoke_parses_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        let result = registry.invoke("echo", r#"{"text":"hi"}"#).await.unwrap();
        assert_eq!(result["echo"]["text"], "hi");
    }

    #[tokio::test]
    async fn test_invoke_empty_arguments_become_object() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        let result = registry.invoke("echo", "").await.unwrap();
        assert_eq!(result["echo"], json!({}));
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nope", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_invoke_rejects_bad_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        let err = registry.invoke("echo", "{not json").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
