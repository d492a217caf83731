//! Token budget management for LLM conversations.
//!
//! Keeps a running estimate of how many tokens a growing history consumes and
//! trims the outgoing view of that history to a fixed sending budget.
//!
//! # Key Components
//!
//! - [`accounting`]: Per-model message accounting rules (overheads, priming)
//! - [`counter`]: Token counting via tiktoken or heuristic estimation
//! - [`limits`]: Model context window limits registry
//! - [`context`]: Conversation history with a lazily synchronized cost cache
//! - [`truncation`]: Prefix-sum binary search truncation and word-level trimming

pub mod accounting;
pub mod context;
pub mod counter;
pub mod limits;
pub mod truncation;

pub use accounting::{resolve_accounting, AccountingRules, ModelAccounting, Resolution};
pub use context::{Bead, ContextSnapshot, ConversationContext};
pub use counter::{HeuristicTokenCounter, SharedTokenCounter, TiktokenCounter, TokenCounter};
pub use limits::{ModelLimit, ModelLimitsRegistry};
pub use truncation::{
    find_cut_index, trim, trim_for_sending, trim_string_by_tokens, CHAR_TRIM_STEP,
};
