pub mod agent;
pub mod budget;
pub mod tools;

pub use agent::events::{AgentEvent, TokenBudgetUsage, TokenUsage};
pub use agent::types::{Message, Role};
pub use agent::AgentError;
pub use budget::{
    trim, trim_for_sending, trim_string_by_tokens, Bead, ContextSnapshot, ConversationContext, HeuristicTokenCounter, ModelLimitsRegistry, SharedTokenCounter,
    TiktokenCounter, TokenCounter,
};
pub use tools::{
    parse_tool_args, FunctionCall, FunctionSchema, Tool, ToolCall, ToolError, ToolExecutor,
    ToolRegistry, ToolResult, ToolSchema,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
