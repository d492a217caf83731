//! Token counting for budget management.
//!
//! [`TiktokenCounter`] encodes with the model's BPE vocabulary; the heuristic
//! counter (chars/4 + 10% margin) is available when exact counts don't matter.
//! Message-level accounting is shared by every counter through the default
//! methods of [`TokenCounter`].

use std::sync::Arc;

use dashmap::DashMap;
use tiktoken_rs::CoreBPE;

use crate::agent::types::Message;
use crate::budget::accounting::resolve_accounting;

/// Encoding used when the model name is not known to tiktoken.
pub const FALLBACK_ENCODING: &str = "cl100k_base";

/// Trait for token counting implementations.
pub trait TokenCounter: Send + Sync {
    /// Count tokens in a plain text string as encoded for `model`.
    fn count_text(&self, text: &str, model: &str) -> u32;

    /// Count tokens in a single message, including per-message framing.
    ///
    /// Role, content, name, tool call id and every tool call's id, name and
    /// arguments are encoded. The result never goes below zero.
    fn count_message(&self, message: &Message, model: &str) -> u32 {
        let rules = resolve_accounting(model).rules;

        let mut total = i64::from(rules.tokens_per_message);
        total += i64::from(self.count_text(message.role().as_str(), model));

        if let Some(content) = message.content() {
            total += i64::from(self.count_text(content, model));
        }
        if let Some(name) = message.name() {
            total += i64::from(self.count_text(name, model));
            total += i64::from(rules.tokens_per_name);
        }
        if let Some(tool_call_id) = message.tool_call_id() {
            total += i64::from(self.count_text(tool_call_id, model));
        }
        for call in message.tool_calls().unwrap_or_default() {
            total += i64::from(self.count_text(&call.id, model));
            total += i64::from(self.count_text(&call.function.name, model));
            total += i64::from(self.count_text(&call.function.arguments, model));
        }

        u32::try_from(total.max(0)).unwrap_or(u32::MAX)
    }

    /// Count tokens in a full request: every message plus reply priming.
    fn count_messages(&self, messages: &[Message], model: &str) -> u32 {
        let priming = resolve_accounting(model).rules.reply_priming;
        messages
            .iter()
            .map(|m| self.count_message(m, model))
            .fold(priming, |acc, x| acc.saturating_add(x))
    }
}

/// Arc-wrapped token counter for easy sharing.
pub type SharedTokenCounter = Arc<dyn TokenCounter>;

/// BPE token counter backed by `tiktoken-rs`.
///
/// Encoders are built once per model name and cached. Unknown models use
/// `cl100k_base`, with a warning logged the first time the model is seen.
#[derive(Default)]
pub struct TiktokenCounter {
    encoders: DashMap<String, Option<Arc<CoreBPE>>>,
    fallback: HeuristicTokenCounter,
}

impl TiktokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedTokenCounter {
        Arc::new(Self::new())
    }

    fn encoder_for(&self, model: &str) -> Option<Arc<CoreBPE>> {
        if let Some(entry) = self.encoders.get(model) {
            return entry.value().clone();
        }

        let encoder = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(_) => {
                tracing::warn!("Model {model} not found. Using {FALLBACK_ENCODING} encoding.");
                match tiktoken_rs::cl100k_base() {
                    Ok(bpe) => Some(Arc::new(bpe)),
                    Err(error) => {
                        tracing::error!(
                            "Failed to load {FALLBACK_ENCODING}: {error}; estimating token counts"
                        );
                        None
                    }
                }
            }
        };

        self.encoders
            .entry(model.to_string())
            .or_insert(encoder)
            .value()
            .clone()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_text(&self, text: &str, model: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }
        match self.encoder_for(model) {
            Some(bpe) => {
                u32::try_from(bpe.encode_with_special_tokens(text).len()).unwrap_or(u32::MAX)
            }
            None => self.fallback.count_text(text, model),
        }
    }
}

/// Heuristic token counter using character-based estimation.
///
/// Uses the approximation: tokens ≈ characters / 4, with a 10% safety margin.
/// This is intentionally conservative to avoid underestimating token usage.
#[derive(Debug, Clone)]
pub struct HeuristicTokenCounter {
    chars_per_token: f64,
    safety_margin: f64,
}

impl HeuristicTokenCounter {
    pub fn new(chars_per_token: f64, safety_margin: f64) -> Self {
        Self {
            chars_per_token,
            safety_margin,
        }
    }
}

impl Default for HeuristicTokenCounter {
    fn default() -> Self {
        Self::new(4.0, 1.1)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_text(&self, text: &str, _model: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        let char_count = text.chars().count() as f64;
        let adjusted_tokens = char_count / self.chars_per_token * self.safety_margin;

        adjusted_tokens.ceil() as u32
    }
}

/// One token per whitespace-separated word. Keeps budget arithmetic in tests readable.
#[cfg(test)]
pub(crate) struct WordCounter;

#[cfg(test)]
impl TokenCounter for WordCounter {
    fn count_text(&self, text: &str, _model: &str) -> u32 {
        text.split_whitespace().count() as u32
    }
}
