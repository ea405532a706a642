//! History truncation under a token budget.
//!
//! Messages are grouped into indivisible units before anything is dropped:
//! an assistant message carrying tool calls and the tool messages answering
//! it always travel together. The first system message and the latest user
//! message are never dropped; if they alone exceed the budget, the user
//! message content is cut at a UTF-8 boundary and the report notes the
//! forced cut so the caller can emit a `context_truncated` status event.

use wv_domain::config::TruncationStrategy;
use wv_domain::tool::{Message, MessageContent, Role};

use crate::counter::{count_message_tokens, count_text_tokens, count_tokens};

/// What the truncation pass did to the history.
#[derive(Debug, Clone, Default)]
pub struct TruncationReport {
    /// Any message was dropped or cut.
    pub changed: bool,
    pub dropped_messages: usize,
    /// The protected tail alone exceeded the budget and the latest user
    /// message content was cut.
    pub forced_tail_cut: bool,
}

/// Truncate `messages` to fit `budget` tokens under the given strategy.
pub fn truncate(
    messages: &[Message],
    budget: usize,
    strategy: TruncationStrategy,
) -> (Vec<Message>, TruncationReport) {
    let mut report = TruncationReport::default();

    if count_tokens(messages) <= budget {
        return (messages.to_vec(), report);
    }

    let mut units = group_units(messages);
    let protected = protected_units(&units, messages);

    // Droppable unit positions, oldest first.
    let droppable: Vec<usize> = (0..units.len()).filter(|i| !protected.contains(i)).collect();

    let mut removed = vec![false; units.len()];
    let mut drop_order = match strategy {
        TruncationStrategy::Smart | TruncationStrategy::Fifo => droppable,
        TruncationStrategy::Middle => middle_out(&droppable),
    };

    let mut current = count_tokens(messages);
    for idx in drop_order.drain(..) {
        if current <= budget {
            break;
        }
        let unit_tokens: usize = units[idx].iter().map(count_message_tokens).sum();
        current -= unit_tokens;
        report.dropped_messages += units[idx].len();
        removed[idx] = true;
    }

    let mut result: Vec<Message> = units
        .drain(..)
        .enumerate()
        .filter(|(i, _)| !removed[*i])
        .flat_map(|(_, u)| u)
        .collect();

    if report.dropped_messages > 0 {
        report.changed = true;
    }

    // Protected messages alone may still exceed the budget.
    if count_tokens(&result) > budget {
        force_cut_last_user(&mut result, budget);
        report.changed = true;
        report.forced_tail_cut = true;
    }

    (result, report)
}

// ── Unit grouping ───────────────────────────────────────────────────

/// Group messages so a tool-call round (assistant request + tool results)
/// is never split.
fn group_units(messages: &[Message]) -> Vec<Vec<Message>> {
    let mut units: Vec<Vec<Message>> = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let msg = &messages[i];
        let calls = msg.tool_calls();
        if msg.role == Role::Assistant && !calls.is_empty() {
            let ids: Vec<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
            let mut unit = vec![msg.clone()];
            let mut j = i + 1;
            while j < messages.len()
                && messages[j].role == Role::Tool
                && messages[j]
                    .tool_call_id
                    .as_deref()
                    .is_some_and(|id| ids.contains(&id))
            {
                unit.push(messages[j].clone());
                j += 1;
            }
            i = j;
            units.push(unit);
        } else {
            units.push(vec![msg.clone()]);
            i += 1;
        }
    }
    units
}

/// Indices of units that must survive: the one holding the first system
/// message and the one holding the latest user message.
fn protected_units(units: &[Vec<Message>], messages: &[Message]) -> Vec<usize> {
    let mut protected = Vec::new();

    if messages.first().is_some_and(|m| m.role == Role::System) {
        protected.push(0);
    }

    let last_user = messages.iter().rposition(|m| m.role == Role::User);
    if let Some(target) = last_user {
        // Locate the unit containing that flat index.
        let mut flat = 0;
        for (i, unit) in units.iter().enumerate() {
            if target < flat + unit.len() {
                if !protected.contains(&i) {
                    protected.push(i);
                }
                break;
            }
            flat += unit.len();
        }
    }

    protected
}

/// Reorder droppable indices so removal starts from the middle and works
/// outward, preserving head and tail as long as possible.
fn middle_out(droppable: &[usize]) -> Vec<usize> {
    let mut order = Vec::with_capacity(droppable.len());
    let mid = droppable.len() / 2;
    let mut lo = mid;
    let mut hi = mid + 1;
    if mid < droppable.len() {
        order.push(droppable[mid]);
    }
    loop {
        let mut pushed = false;
        if hi < droppable.len() {
            order.push(droppable[hi]);
            hi += 1;
            pushed = true;
        }
        if lo > 0 {
            lo -= 1;
            order.push(droppable[lo]);
            pushed = true;
        }
        if !pushed {
            break;
        }
    }
    order
}

// ── Forced tail cut ─────────────────────────────────────────────────

/// Cut the latest user message's text so the whole list fits the budget.
fn force_cut_last_user(messages: &mut [Message], budget: usize) {
    let Some(pos) = messages.iter().rposition(|m| m.role == Role::User) else {
        return;
    };

    let others: usize = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != pos)
        .map(|(_, m)| count_message_tokens(m))
        .sum();
    // 4 = message envelope overhead.
    let allowance = budget.saturating_sub(others).saturating_sub(4);

    let text = messages[pos].content.joined_text();
    let cut = fit_prefix(&text, allowance);
    messages[pos].content = MessageContent::Text(cut);
}

/// Longest prefix of `text` (on a char boundary) whose estimated token
/// count is at most `allowance`.
fn fit_prefix(text: &str, allowance: usize) -> String {
    if count_text_tokens(text) <= allowance {
        return text.to_string();
    }
    let mut lo = 0usize;
    let mut hi = text.len();
    while lo < hi {
        let mid = floor_char_boundary(text, (lo + hi + 1) / 2);
        if mid == lo {
            break;
        }
        if count_text_tokens(&text[..mid]) <= allowance {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    text[..floor_char_boundary(text, lo)].to_string()
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use wv_domain::tool::ToolCall;

    fn tool_round(call_id: &str, filler: &str) -> Vec<Message> {
        let call = ToolCall {
            call_id: call_id.into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({ "query": filler }),
        };
        vec![
            Message::assistant_with_tool_calls(filler, &[call]),
            Message::tool_result(call_id, filler),
        ]
    }

    fn has_orphan_tool_message(messages: &[Message]) -> bool {
        messages.iter().enumerate().any(|(i, m)| {
            m.role == Role::Tool
                && !messages[..i].iter().any(|prev| {
                    prev.tool_calls()
                        .iter()
                        .any(|c| Some(c.call_id.as_str()) == m.tool_call_id.as_deref())
                })
        })
    }

    #[test]
    fn under_budget_is_untouched() {
        let msgs = vec![Message::system("sys"), Message::user("hi")];
        let (out, report) = truncate(&msgs, 1_000, TruncationStrategy::Smart);
        assert_eq!(out.len(), 2);
        assert!(!report.changed);
    }

    #[test]
    fn smart_keeps_system_and_last_user() {
        let filler = "x".repeat(400);
        let mut msgs = vec![Message::system("you are weaver")];
        for i in 0..10 {
            msgs.push(Message::user(format!("{filler} {i}")));
            msgs.push(Message::assistant(format!("{filler} reply {i}")));
        }
        msgs.push(Message::user("final question"));

        let (out, report) = truncate(&msgs, 400, TruncationStrategy::Smart);
        assert!(report.changed);
        assert!(count_tokens(&out) <= 400);
        assert_eq!(out.first().unwrap().role, Role::System);
        assert_eq!(out.last().unwrap().role, Role::User);
        assert_eq!(out.last().unwrap().content.joined_text(), "final question");
    }

    #[test]
    fn tool_pairs_survive_together() {
        let filler = "y".repeat(200);
        let mut msgs = vec![Message::system("sys")];
        msgs.push(Message::user("start"));
        for i in 0..8 {
            msgs.extend(tool_round(&format!("tc_{i}"), &filler));
        }
        msgs.push(Message::user("latest"));

        let (out, _) = truncate(&msgs, 300, TruncationStrategy::Smart);
        assert!(count_tokens(&out) <= 300);
        assert!(!has_orphan_tool_message(&out));
    }

    #[test]
    fn fifo_drops_oldest_first() {
        let filler = "z".repeat(100);
        let mut msgs = vec![Message::system("sys")];
        for i in 0..6 {
            msgs.push(Message::user(format!("old {i} {filler}")));
            msgs.push(Message::assistant(format!("reply {i} {filler}")));
        }
        msgs.push(Message::user("newest"));

        let (out, _) = truncate(&msgs, 200, TruncationStrategy::Fifo);
        assert!(count_tokens(&out) <= 200);
        // The oldest exchange must be gone before any newer one.
        let texts: Vec<String> = out.iter().map(|m| m.content.joined_text()).collect();
        assert!(!texts.iter().any(|t| t.starts_with("old 0")));
        assert_eq!(texts.last().unwrap(), "newest");
    }

    #[test]
    fn middle_keeps_head_and_tail() {
        let filler = "w".repeat(120);
        let mut msgs = vec![Message::system("sys")];
        msgs.push(Message::user(format!("first {filler}")));
        for i in 0..6 {
            msgs.push(Message::assistant(format!("mid {i} {filler}")));
        }
        msgs.push(Message::assistant(format!("last reply {filler}")));
        msgs.push(Message::user("newest"));

        let (out, _) = truncate(&msgs, 250, TruncationStrategy::Middle);
        assert!(count_tokens(&out) <= 250);
        let texts: Vec<String> = out.iter().map(|m| m.content.joined_text()).collect();
        // Head survives ahead of the middle.
        assert!(texts.iter().any(|t| t.starts_with("first")));
        assert_eq!(texts.last().unwrap(), "newest");
    }

    #[test]
    fn oversized_tail_is_force_cut_at_char_boundary() {
        let huge = "caf\u{00e9} ".repeat(2_000);
        let msgs = vec![Message::system("sys"), Message::user(huge)];
        let (out, report) = truncate(&msgs, 100, TruncationStrategy::Smart);
        assert!(report.forced_tail_cut);
        assert!(count_tokens(&out) <= 100);
        assert_eq!(out.len(), 2);
        // Content must still be valid UTF-8 prose (no split codepoint panic).
        let _ = out[1].content.joined_text();
    }

    #[test]
    fn no_system_prompt_still_protects_last_user() {
        let filler = "q".repeat(300);
        let msgs = vec![
            Message::user(filler.clone()),
            Message::assistant(filler),
            Message::user("keep me"),
        ];
        let (out, _) = truncate(&msgs, 60, TruncationStrategy::Smart);
        assert!(count_tokens(&out) <= 60);
        assert_eq!(out.last().unwrap().content.joined_text(), "keep me");
    }
}
