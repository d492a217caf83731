use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tools::{ToolResult, ToolSchema};

/// Argument key whose string value is streamed to the user while the call is assembled.
pub const TO_USER_FIELD: &str = "to_user";

#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Resolves tool calls by function name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn invoke(&self, name: &str, args: Map<String, Value>) -> Result<ToolResult>;

    fn list_tools(&self) -> Vec<ToolSchema>;
}

/// Parse the raw argument text of a tool call into a JSON object.
///
/// Empty arguments are treated as `{}`.
pub fn parse_tool_args(arguments: &str) -> Result<Map<String, Value>> {
    let args_raw = arguments.trim();

    if args_raw.is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(args_raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(error) => Err(ToolError::InvalidArguments(format!(
            "Invalid JSON arguments: {error}"
        ))),
    }
}

/// Remove the display-only field before the arguments reach the tool.
pub fn strip_display_field(mut args: Map<String, Value>) -> Map<String, Value> {
    args.remove(TO_USER_FIELD);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arguments_parse_to_empty_object() {
        assert!(parse_tool_args("  ").unwrap().is_empty());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let error = parse_tool_args("[1, 2]").unwrap_err();
        assert!(matches!(error, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn truncated_arguments_are_rejected() {
        let error = parse_tool_args(r#"{"query":"wea"#).unwrap_err();
        assert!(error.to_string().contains("Invalid JSON arguments"));
    }

    #[test]
    fn display_field_is_stripped() {
        let args = parse_tool_args(r#"{"to_user":"Searching...","query":"weather"}"#).unwrap();
        let args = strip_display_field(args);
        assert_eq!(args.len(), 1);
        assert_eq!(args["query"], "weather");
    }
}
