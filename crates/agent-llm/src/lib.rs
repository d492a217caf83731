pub mod adapter;
pub mod provider;
pub mod providers;
pub mod types;

pub use adapter::StreamAdapter;
pub use provider::{LLMError, LLMProvider, LLMStream};
pub use providers::OpenAIProvider;
pub use types::{FinishReason, StreamDelta, ToolCallFragment};
