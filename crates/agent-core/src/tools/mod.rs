pub mod executor;
pub mod registry;
pub mod types;

pub use executor::{parse_tool_args, strip_display_field, ToolError, ToolExecutor, TO_USER_FIELD};
pub use registry::{normalize_tool_name, RegistryError, SharedTool, Tool, ToolRegistry};
pub use types::{FunctionCall, FunctionSchema, ToolCall, ToolResult, ToolSchema};
