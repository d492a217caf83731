use async_trait::async_trait;
use serde_json::{json, Map, Value};

use agent_core::tools::{Tool, ToolError, ToolResult, TO_USER_FIELD};

/// Reports the local date and time.
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current local date and time"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                TO_USER_FIELD: {
                    "type": "string",
                    "description": "Short note shown to the user while the tool runs"
                },
                "format": {
                    "type": "string",
                    "description": "strftime format, defaults to RFC 3339"
                }
            }
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let now = chrono::Local::now();
        let text = match args.get("format") {
            None | Some(Value::Null) => now.to_rfc3339(),
            Some(Value::String(format)) => {
                let mut out = String::new();
                use std::fmt::Write;
                write!(out, "{}", now.format(format)).map_err(|_| {
                    ToolError::InvalidArguments(format!("invalid time format: {format}"))
                })?;
                out
            }
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "format must be a string, got {other}"
                )))
            }
        };
        Ok(ToolResult::ok(text))
    }
}
