//! Deterministic token estimation.
//!
//! No provider tokenizer is bundled; estimates use 4 chars per token for
//! ASCII runs and one token per codepoint for everything else, which keeps
//! CJK and other non-Western scripts from being undercounted.

use wv_domain::tool::{ContentPart, Message, MessageContent};

/// Fixed overhead per message for role/framing tokens.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate tokens for a plain text string.
pub fn count_text_tokens(text: &str) -> usize {
    let mut ascii_run = 0usize;
    let mut tokens = 0usize;
    for ch in text.chars() {
        if ch.is_ascii() {
            ascii_run += 1;
        } else {
            tokens += ascii_run.div_ceil(4);
            ascii_run = 0;
            tokens += 1;
        }
    }
    tokens + ascii_run.div_ceil(4)
}

/// Estimate tokens for one message, including tool-call payloads.
pub fn count_message_tokens(message: &Message) -> usize {
    let content = match &message.content {
        MessageContent::Text(t) => count_text_tokens(t),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => count_text_tokens(text),
                ContentPart::ToolUse { name, input, .. } => {
                    count_text_tokens(name) + count_text_tokens(&input.to_string())
                }
                ContentPart::ToolResult { content, .. } => count_text_tokens(content),
                // Images are counted by their reference, not their pixels.
                ContentPart::Image { url, .. } => count_text_tokens(url).min(128),
            })
            .sum(),
    };
    MESSAGE_OVERHEAD + content
}

/// Estimate tokens for a whole message list.
pub fn count_tokens(messages: &[Message]) -> usize {
    messages.iter().map(count_message_tokens).sum()
}
