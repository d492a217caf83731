//! Conversation history with a lazily synchronized token cost cache.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::types::Message;
use crate::budget::accounting::resolve_accounting;
use crate::budget::counter::SharedTokenCounter;
use crate::budget::limits::ModelLimitsRegistry;

/// A pinned message that survives truncation.
///
/// `position` is the number of history messages that preceded the bead when it
/// was pinned; the truncated view re-inserts it relative to the kept suffix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bead {
    pub message: Message,
    pub position: usize,
}

/// Serializable state of a [`ConversationContext`]. The token cache is not
/// persisted; it is rebuilt on first use after restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_sending_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bead: Option<Bead>,
}

/// Full, untruncated history of one conversation.
///
/// `token_costs()[i]` is the cost of `messages()[i]` under the current model.
/// Appends extend the cache incrementally; anything else (pop, model change)
/// marks it stale and forces a recomputation on next access.
pub struct ConversationContext {
    messages: Vec<Message>,
    token_cache: Vec<u32>,
    cache_model: Option<String>,
    cache_stale: bool,
    model: String,
    max_sending_tokens: u32,
    bead: Option<Bead>,
    counter: SharedTokenCounter,
}

impl fmt::Debug for ConversationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationContext")
            .field("messages", &self.messages.len())
            .field("cached", &self.token_cache.len())
            .field("cache_stale", &self.cache_stale)
            .field("model", &self.model)
            .field("max_sending_tokens", &self.max_sending_tokens)
            .field("bead", &self.bead.is_some())
            .finish()
    }
}

impl ConversationContext {
    pub fn new(
        model: impl Into<String>,
        max_sending_tokens: u32,
        counter: SharedTokenCounter,
    ) -> Self {
        let model = model.into();
        resolve_accounting(&model).warn_if_inexact(&model);
        Self {
            messages: Vec::new(),
            token_cache: Vec::new(),
            cache_model: None,
            cache_stale: false,
            model,
            max_sending_tokens,
            bead: None,
            counter,
        }
    }

    /// Context whose sending budget comes from the model's known limits.
    pub fn for_model(
        model: impl Into<String>,
        limits: &ModelLimitsRegistry,
        counter: SharedTokenCounter,
    ) -> Self {
        let model = model.into();
        let max_sending_tokens = limits.sending_budget(&model);
        Self::new(model, max_sending_tokens, counter)
    }

    pub fn from_snapshot(snapshot: ContextSnapshot, counter: SharedTokenCounter) -> Self {
        let mut context = Self::new(snapshot.model, snapshot.max_sending_tokens, counter);
        context.messages = snapshot.messages;
        context.bead = snapshot.bead;
        context
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            messages: self.messages.clone(),
            model: self.model.clone(),
            max_sending_tokens: self.max_sending_tokens,
            bead: self.bead.clone(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_sending_tokens(&self) -> u32 {
        self.max_sending_tokens
    }

    pub fn counter(&self) -> &SharedTokenCounter {
        &self.counter
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn pop(&mut self) -> Option<Message> {
        let popped = self.messages.pop();
        if popped.is_some() {
            self.cache_stale = true;
            if let Some(bead) = &mut self.bead {
                bead.position = bead.position.min(self.messages.len());
            }
        }
        popped
    }

    /// Switch models. Costs are recomputed under the new model on next access.
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        if model != self.model {
            resolve_accounting(&model).warn_if_inexact(&model);
            self.model = model;
            self.cache_stale = true;
        }
    }

    pub fn set_max_sending_tokens(&mut self, max_sending_tokens: u32) {
        self.max_sending_tokens = max_sending_tokens;
    }

    /// Pin `message` after the current end of the history.
    pub fn pin_bead(&mut self, message: Message) {
        let position = self.messages.len();
        self.pin_bead_at(message, position);
    }

    /// Pin `message` after the first `position` history messages.
    pub fn pin_bead_at(&mut self, message: Message, position: usize) {
        let position = position.min(self.messages.len());
        self.bead = Some(Bead { message, position });
    }

    pub fn unpin_bead(&mut self) -> Option<Bead> {
        self.bead.take()
    }

    pub fn bead(&self) -> Option<&Bead> {
        self.bead.as_ref()
    }

    pub fn bead_cost(&self) -> u32 {
        self.bead
            .as_ref()
            .map(|bead| self.counter.count_message(&bead.message, &self.model))
            .unwrap_or(0)
    }

    /// Per-message costs, aligned with [`messages`](Self::messages).
    pub fn token_costs(&mut self) -> &[u32] {
        self.sync_token_cache();
        &self.token_cache
    }

    /// Sum of the history's message costs (bead and reply priming excluded).
    pub fn total_tokens(&mut self) -> u64 {
        self.token_costs().iter().map(|&c| u64::from(c)).sum()
    }

    /// The full history with the bead spliced in at its position.
    pub fn full_history(&self) -> Vec<Message> {
        let mut history = self.messages.clone();
        if let Some(bead) = &self.bead {
            let at = bead.position.min(history.len());
            history.insert(at, bead.message.clone());
        }
        history
    }

    fn sync_token_cache(&mut self) {
        let model_changed = self.cache_model.as_deref() != Some(self.model.as_str());
        if self.cache_stale || model_changed || self.token_cache.len() > self.messages.len() {
            self.token_cache.clear();
            self.cache_model = Some(self.model.clone());
            self.cache_stale = false;
        }

        let missing = self.token_cache.len()..self.messages.len();
        if missing.is_empty() {
            return;
        }

        let counter = &self.counter;
        let model = self.model.as_str();
        self.token_cache.extend(
            self.messages[missing]
                .iter()
                .map(|message| counter.count_message(message, model)),
        );
    }
}
