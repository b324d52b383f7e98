//! Trigger check, cut-point selection, and summarization prompt for
//! session compaction.

use super::error::SessionError;
use super::{EntryKind, Session, SessionEntry};
use crate::message::{AgentMessage, Message};
use crate::model::Usage;

/// Default reserve subtracted from the context window before triggering.
pub const DEFAULT_RESERVE_TOKENS: u64 = 16_384;

/// Default token budget protected from the cut (the branch tail).
pub const DEFAULT_KEEP_RECENT_TOKENS: u64 = 20_000;

/// How far forward the cut-point scan looks for a `User`/`Assistant`
/// boundary before giving up and using the raw token-sum index.
const BOUNDARY_SCAN_WINDOW: usize = 5;

/// True once the context has grown past `window - reserve`.
pub fn should_compact(ctx_tokens: u64, window: u64, reserve: u64) -> bool {
    ctx_tokens > window.saturating_sub(reserve)
}

/// Char-count/4 heuristic used when no provider usage is available yet.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn message_tokens(message: &Message) -> u64 {
    match message {
        Message::User { content, .. } => estimate_tokens(&content.as_text()),
        Message::Assistant { content, .. } => {
            let chars: usize = content
                .iter()
                .map(|block| match block {
                    crate::message::ContentBlock::Text { text } => text.len(),
                    crate::message::ContentBlock::Thinking { text } => text.len(),
                    crate::message::ContentBlock::ToolCall(call) => {
                        call.name.len() + call.arguments.len() * 16
                    }
                })
                .sum();
            (chars as u64).div_ceil(4)
        }
        Message::ToolResult { content, .. } => {
            let chars: usize = content
                .iter()
                .map(|block| match block {
                    crate::message::ToolResultBlock::Text { text } => text.len(),
                    crate::message::ToolResultBlock::Image { .. } => 512,
                })
                .sum();
            (chars as u64).div_ceil(4)
        }
    }
}

/// Result of [`select_cut_point`]: the index into `messages` (0-based,
/// oldest-first) at which the kept tail begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutPoint(pub usize);

/// Walk `messages` newest-to-oldest accumulating tokens until
/// `keep_recent_tokens` is reached, then scan forward up to
/// [`BOUNDARY_SCAN_WINDOW`] messages for a `User`/`Assistant` boundary
/// (never a `ToolResult`, which would orphan its parent tool call).
/// Fails with [`SessionError::CannotCompact`] if the resulting cut point
/// is 0 (nothing to summarize).
pub fn select_cut_point(messages: &[Message], keep_recent_tokens: u64) -> Result<CutPoint, SessionError> {
    if messages.is_empty() {
        return Err(SessionError::CannotCompact("no messages to compact".into()));
    }

    let mut running = 0u64;
    let mut raw_index = messages.len();
    for (i, message) in messages.iter().enumerate().rev() {
        if running >= keep_recent_tokens {
            raw_index = i + 1;
            break;
        }
        running += message_tokens(message);
        raw_index = i;
    }

    let mut cut = raw_index;
    for i in raw_index..(raw_index + BOUNDARY_SCAN_WINDOW).min(messages.len()) {
        if matches!(messages[i], Message::User { .. } | Message::Assistant { .. }) {
            cut = i;
            break;
        }
    }

    if cut == 0 {
        return Err(SessionError::CannotCompact("cut point resolved to the start of the branch".into()));
    }
    Ok(CutPoint(cut))
}

/// Build the summarization prompt: a single user message asking for a
/// structured checkpoint, optionally folding in a prior summary so
/// repeated compactions don't lose earlier context.
pub fn build_summarization_prompt(messages_to_summarize: &[Message], existing_summary: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(existing) = existing_summary {
        prompt.push_str("Here is the summary of the conversation so far:\n");
        prompt.push_str(existing);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Summarize the conversation below into a compact checkpoint so work can resume with no other context. \
         Use exactly these sections: Goal, Progress, Current State, Key Decisions, Next Steps, Files Modified.\n\n",
    );
    for message in messages_to_summarize {
        match message {
            Message::User { content, .. } => prompt.push_str(&format!("User: {}\n", content.as_text())),
            Message::Assistant { content, .. } => {
                for block in content {
                    if let crate::message::ContentBlock::Text { text } = block {
                        prompt.push_str(&format!("Assistant: {text}\n"));
                    }
                }
            }
            Message::ToolResult { tool_name, content, .. } => {
                for block in content {
                    if let crate::message::ToolResultBlock::Text { text } = block {
                        prompt.push_str(&format!("Tool[{tool_name}]: {text}\n"));
                    }
                }
            }
        }
    }
    prompt
}

/// Commit a compaction: append `Compaction(summary, first_kept_entry_id,
/// tokens_before)` to `session`, chained from its current leaf.
///
/// `cut_entry` names the first entry the new branch keeps — the caller
/// resolves it from [`select_cut_point`] against the entry chain, since
/// the cut point is computed over the folded `Message` list but the
/// commit needs the underlying `SessionEntry` id.
pub fn commit_compaction(
    session: &mut Session,
    summary: String,
    cut_entry: &SessionEntry,
    tokens_before: u64,
) -> Result<SessionEntry, SessionError> {
    session.append(EntryKind::Compaction {
        summary,
        first_kept_entry_id: cut_entry.id.clone(),
        tokens_before,
    })
}

/// Estimate the total token cost of the current context, preferring the
/// latest reported [`Usage`] when the caller has one.
pub fn context_tokens(messages: &[AgentMessage], last_usage: Option<&Usage>) -> u64 {
    if let Some(usage) = last_usage {
        return usage.total;
    }
    messages
        .iter()
        .filter_map(AgentMessage::as_message)
        .map(message_tokens)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn should_compact_trips_past_window_minus_reserve() {
        assert!(should_compact(190_000, 200_000, 16_384));
        assert!(!should_compact(100_000, 200_000, 16_384));
    }

    #[test]
    fn cut_point_never_lands_on_a_tool_result() {
        let messages = vec![
            Message::user("first"),
            Message::assistant_error(crate::model::Api::AnthropicMessages, "anthropic", "m", "ignored"),
            Message::tool_result("call_1", "tool", "result"),
            Message::user("second"),
        ];
        let cut = select_cut_point(&messages, 0).unwrap();
        assert!(matches!(messages[cut.0], Message::User { .. } | Message::Assistant { .. }));
    }

    #[test]
    fn empty_conversation_cannot_compact() {
        assert!(select_cut_point(&[], 1000).is_err());
    }

    #[test]
    fn cut_point_of_zero_is_an_error() {
        let messages = vec![Message::user("only message")];
        let err = select_cut_point(&messages, 0);
        assert!(err.is_err());
    }

    #[test]
    fn summarization_prompt_includes_existing_summary() {
        let prompt = build_summarization_prompt(&[Message::user("hi")], Some("earlier work"));
        assert!(prompt.contains("earlier work"));
        assert!(prompt.contains("Goal"));
    }
}
