use crate::tools::ToolResult;
use serde::{Deserialize, Serialize};

/// Notifications emitted by the orchestrator while a conversation turn runs.
///
/// User-visible text does not travel through here; it goes to the display sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    ToolComplete {
        tool_call_id: String,
        result: ToolResult,
    },

    ToolError {
        tool_call_id: String,
        error: String,
    },

    /// A completed tool call whose arguments could not be parsed.
    ToolSkipped {
        tool_call_id: String,
        tool_name: String,
        reason: String,
    },

    /// Emitted after the outgoing history has been trimmed to the sending budget.
    TokenBudgetUpdated {
        usage: TokenBudgetUsage,
    },

    Complete {
        usage: TokenUsage,
    },

    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_chunks: u32,
    pub tool_calls: u32,
}

/// Token budget usage for one outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetUsage {
    /// Budget the history was trimmed against (after offsets)
    pub budget_limit: i64,
    /// Tokens consumed by the messages actually sent
    pub total_tokens: u32,
    /// Messages kept in the outgoing view
    pub kept_messages: usize,
    /// Messages of stored history left out of the outgoing view
    pub dropped_messages: usize,
}

impl TokenBudgetUsage {
    pub fn truncation_occurred(&self) -> bool {
        self.dropped_messages > 0
    }
}
