//! Context window truncation.
//!
//! Drops the oldest messages until a conversation's summed token counts fit
//! a budget. A system message at position 0 is pinned and never dropped; a
//! system message anywhere else is treated like any other message.

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::Message;

/// Outcome of a truncation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TruncationReport {
    /// Messages dropped from the front of the conversation.
    pub removed: usize,
    /// Sum of token counts over the kept messages.
    pub total_tokens: usize,
    /// False only when the pinned system message alone exceeds the budget.
    pub within_budget: bool,
}

/// Sum of `token_count` over `messages`.
pub fn total_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.token_count).sum()
}

/// Truncate `messages` to fit `max_tokens`, oldest first.
pub fn truncate(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    truncate_with_report(messages, max_tokens).0
}

/// Like [`truncate`], also reporting what was removed.
pub fn truncate_with_report(
    messages: &[Message],
    max_tokens: usize,
) -> (Vec<Message>, TruncationReport) {
    let pinned = usize::from(messages.first().is_some_and(Message::is_system));

    let mut total = total_tokens(messages);
    let mut removed = 0;
    while total > max_tokens && pinned + removed < messages.len() {
        total -= messages[pinned + removed].token_count;
        removed += 1;
    }

    let mut kept = Vec::with_capacity(messages.len() - removed);
    kept.extend_from_slice(&messages[..pinned]);
    kept.extend_from_slice(&messages[pinned + removed..]);

    let within_budget = total <= max_tokens;
    if removed > 0 {
        debug!(removed, total, max_tokens, "Truncated conversation");
    }
    if !within_budget {
        warn!(
            total,
            max_tokens, "System message alone exceeds the context budget"
        );
    }

    (
        kept,
        TruncationReport {
            removed,
            total_tokens: total,
            within_budget,
        },
    )
}
