//! Tool trait — the tool capability.
//!
//! The graph treats every tool uniformly: a named, schema-described unit
//! exposing `execute(args) -> result`, whatever domain backs it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// Ordered so that the definitions sent to the model are stable between
/// turns (a reordered tool list busts provider-side prompt caches).
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call. Unknown tools are an error, not a silent no-op.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        if result.call_id.is_empty() {
            result.call_id = call.id.clone();
        }
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BalanceTool;

    #[async_trait]
    impl Tool for BalanceTool {
        fn name(&self) -> &str { "get_balance" }
        fn description(&self) -> &str { "Returns a fixed balance for an address" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "address": { "type": "string" } },
                "required": ["address"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
            let address = arguments["address"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("address is required".into()))?;
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format!("{address}: 100"),
                data: None,
            })
        }
    }

    #[test]
    fn registry_definitions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(BalanceTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "get_balance");
        assert!(registry.get("transfer").is_none());
    }

    #[tokio::test]
    async fn execute_fills_in_call_id() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(BalanceTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "get_balance".into(),
            arguments: serde_json::json!({"address": "0xabc"}),
        };
        let result = registry.execute(&call).await.unwrap();
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.output, "0xabc: 100");
    }

    #[tokio::test]
    async fn invalid_arguments_propagate() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(BalanceTool));
        let call = ToolCall {
            id: "call_2".into(),
            name: "get_balance".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn missing_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }
}
