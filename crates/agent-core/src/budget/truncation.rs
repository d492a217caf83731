//! Truncation of a conversation history to a token budget.
//!
//! The kept view is always a suffix of the history: the most recent messages
//! whose combined cost fits. When not even the last message fits on its own,
//! its content is cut down from the front, keeping the trailing words.

use crate::agent::types::Message;
use crate::budget::context::ConversationContext;
use crate::budget::counter::TokenCounter;

/// Amount the allowance shrinks on each attempt to fit a single oversized message.
pub const CHAR_TRIM_STEP: i64 = 5;

/// Produce the outgoing view of `context` that fits the sending budget.
///
/// The budget is `max_tokens` (or the context's `max_sending_tokens` when
/// `None`) plus `offset`, less the cost of the pinned bead. The bead itself is
/// always part of the result, spliced back at its position relative to the
/// kept suffix. The full history in `context` is never modified.
pub fn trim(context: &mut ConversationContext, max_tokens: Option<u32>, offset: i64) -> Vec<Message> {
    let (_, kept) = trim_history(context, max_tokens, offset);
    with_bead(context, kept)
}

/// [`trim`] for a request about to go to a provider.
///
/// Tool results whose assistant message fell outside the kept suffix are
/// removed before the bead is spliced in, so a pinned message of any role
/// never hides an orphan. When nothing but orphans survived, the most recent
/// user-facing message is sent in their place, fitted to the same budget.
pub fn trim_for_sending(
    context: &mut ConversationContext,
    max_tokens: Option<u32>,
    offset: i64,
) -> Vec<Message> {
    let (budget, kept) = trim_history(context, max_tokens, offset);
    let had_history = !kept.is_empty();
    let kept = strip_orphans(kept);
    if !kept.is_empty() || !had_history {
        return with_bead(context, kept);
    }

    let Some(index) = anchor_index(context.messages()) else {
        tracing::warn!("History holds only tool results; sending bead alone");
        return with_bead(context, Vec::new());
    };
    tracing::debug!("Kept history was only orphaned tool results; falling back to message {index}");

    let message = context.messages()[index].clone();
    let fitted = if budget <= 0 {
        message.with_content("")
    } else if i64::from(context.token_costs()[index]) < budget {
        message
    } else {
        let model = context.model().to_string();
        fit_single_message(&message, budget, context.counter().as_ref(), &model)
    };
    with_bead(context, vec![(index, fitted)])
}

/// Suffix of the history that fits, each message tagged with its history index.
fn trim_history(
    context: &mut ConversationContext,
    max_tokens: Option<u32>,
    offset: i64,
) -> (i64, Vec<(usize, Message)>) {
    let base = i64::from(max_tokens.unwrap_or_else(|| context.max_sending_tokens()));
    let budget = base + offset - i64::from(context.bead_cost());

    let Some(last) = context.messages().last().cloned() else {
        return (budget, Vec::new());
    };
    let len = context.len();

    if budget <= 0 {
        tracing::warn!(
            "Token budget {budget} leaves no room for history; sending last message without content"
        );
        return (budget, vec![(len - 1, last.with_content(""))]);
    }

    let cut = find_cut_index(context.token_costs(), budget);
    if cut < len {
        tracing::debug!(
            "Trimmed history to {} of {} messages (budget {budget})",
            len - cut,
            len
        );
        let kept = context.messages()[cut..]
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, message)| (cut + i, message))
            .collect();
        return (budget, kept);
    }

    let model = context.model().to_string();
    let trimmed = fit_single_message(&last, budget, context.counter().as_ref(), &model);
    (budget, vec![(len - 1, trimmed)])
}

/// Left-most index `p` such that `costs[p..]` sums to strictly less than `budget`.
///
/// Returns `costs.len()` when even the last message alone reaches the budget.
pub fn find_cut_index(costs: &[u32], budget: i64) -> usize {
    let mut prefix = Vec::with_capacity(costs.len() + 1);
    prefix.push(0i64);
    for &cost in costs {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + i64::from(cost));
    }
    let total = prefix[costs.len()];
    let suffix = |p: usize| total - prefix[p];

    let (mut lo, mut hi) = (0, costs.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if suffix(mid) < budget {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Longest word-aligned suffix of `text` costing at most `max_tokens`.
///
/// Returns `text` unchanged when it already fits and an empty string when not
/// even its last word does.
pub fn trim_string_by_tokens(
    text: &str,
    max_tokens: u32,
    counter: &dyn TokenCounter,
    model: &str,
) -> String {
    if counter.count_text(text, model) <= max_tokens {
        return text.to_string();
    }

    let starts = word_starts(text);
    let fits = |i: usize| counter.count_text(&text[starts[i]..], model) <= max_tokens;

    let Some(last_start) = starts.len().checked_sub(1) else {
        return String::new();
    };
    if !fits(last_start) {
        return String::new();
    }

    let (mut lo, mut hi) = (0, last_start);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if fits(mid) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    text[starts[lo]..].to_string()
}

/// Drop tool results that lost their originating assistant message to truncation.
///
/// Leading system messages are kept; tool messages are removed until the first
/// user or assistant message.
fn strip_orphans(messages: Vec<(usize, Message)>) -> Vec<(usize, Message)> {
    let before = messages.len();
    let mut in_prefix = true;
    let kept: Vec<(usize, Message)> = messages
        .into_iter()
        .filter(|(_, message)| {
            if !in_prefix {
                return true;
            }
            match message {
                Message::Tool { .. } => false,
                Message::System { .. } => true,
                Message::User { .. } | Message::Assistant { .. } => {
                    in_prefix = false;
                    true
                }
            }
        })
        .collect();

    if kept.len() < before {
        tracing::debug!("Removed {} orphaned tool results", before - kept.len());
    }
    kept
}

/// Last message that can open a request on its own: not a tool result and not
/// an assistant turn still waiting on tool results.
fn anchor_index(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|message| match message {
        Message::Tool { .. } => false,
        Message::Assistant { tool_calls, .. } => tool_calls.as_ref().map_or(true, Vec::is_empty),
        Message::System { .. } | Message::User { .. } => true,
    })
}

fn fit_single_message(
    message: &Message,
    budget: i64,
    counter: &dyn TokenCounter,
    model: &str,
) -> Message {
    let content = message.content().unwrap_or_default();
    let mut allowance = budget;

    loop {
        allowance -= CHAR_TRIM_STEP;
        if allowance <= 0 {
            tracing::warn!("Last message cannot fit budget {budget}; sending it without content");
            return message.with_content("");
        }

        let max_tokens = u32::try_from(allowance).unwrap_or(u32::MAX);
        let candidate = message.with_content(trim_string_by_tokens(content, max_tokens, counter, model));
        if i64::from(counter.count_message(&candidate, model)) < budget {
            return candidate;
        }
    }
}

fn with_bead(context: &ConversationContext, kept: Vec<(usize, Message)>) -> Vec<Message> {
    let at = context
        .bead()
        .map(|bead| kept.iter().take_while(|(index, _)| *index < bead.position).count());
    let mut messages: Vec<Message> = kept.into_iter().map(|(_, message)| message).collect();
    if let (Some(bead), Some(at)) = (context.bead(), at) {
        messages.insert(at, bead.message.clone());
    }
    messages
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev_whitespace = true;
    for (index, ch) in text.char_indices() {
        let whitespace = ch.is_whitespace();
        if !whitespace && prev_whitespace {
            starts.push(index);
        }
        prev_whitespace = whitespace;
    }
    starts
}
