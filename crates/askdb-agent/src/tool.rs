//! Tool trait and execution

use askdb_ai::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A statement that went through the query tool, accepted or not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedQuery {
    /// SQL as submitted by the model
    pub sql: String,
    /// Rendered result, or the refusal text when rejected
    pub result: String,
    /// Whether the statement passed the guard and reached the database
    pub accepted: bool,
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text returned to the LLM
    pub content: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Set only by tools that run model-authored SQL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<ExecutedQuery>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_error: false,
            query: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            query: None,
        }
    }

    /// Attach the executed statement
    pub fn with_query(mut self, query: ExecutedQuery) -> Self {
        self.query = Some(query);
        self
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    ///
    /// Tools never fail the run: problems are reported through the returned
    /// text so the model can react to them.
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to an askdb_ai::ToolSchema for API calls
pub fn to_api_tool(tool: &dyn Tool) -> ToolSchema {
    ToolSchema {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// Read a required string argument
pub(crate) fn string_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                }
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            ToolResult::text(string_arg(&arguments, "text").unwrap_or("(empty)"))
        }
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let result = EchoTool
            .execute(
                "call_1",
                serde_json::json!({"text": "hello"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
        assert!(result.query.is_none());
    }

    #[test]
    fn test_tool_result_error() {
        let r = ToolResult::error("bad");
        assert!(r.is_error);
        assert_eq!(r.content, "bad");
    }

    #[test]
    fn test_with_query() {
        let r = ToolResult::text("[[3]]").with_query(ExecutedQuery {
            sql: "SELECT COUNT(*) FROM t".into(),
            result: "[[3]]".into(),
            accepted: true,
        });
        assert_eq!(r.query.unwrap().sql, "SELECT COUNT(*) FROM t");
    }

    #[test]
    fn test_to_api_tool() {
        let api_tool = to_api_tool(&EchoTool);
        assert_eq!(api_tool.name, "echo");
        assert_eq!(api_tool.description, "Echoes input");
        assert_eq!(api_tool.parameters["type"], "object");
    }
}
