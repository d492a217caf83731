use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LLM(String),

    #[error("Demultiplexer task failed: {0}")]
    Stream(String),

    #[error("Cancelled")]
    Cancelled,
}
