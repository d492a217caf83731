/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Upper bound on model requests for one user message.
    pub max_rounds: usize,
    /// Passed to the provider as `max_tokens`.
    pub max_output_tokens: Option<u32>,
    /// Prefix for log lines.
    pub session_id: String,
    /// If true, the user message is already the last entry of the context.
    pub skip_initial_user_message: bool,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            max_output_tokens: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            skip_initial_user_message: false,
        }
    }
}
