//! Context-window management: token counting and history truncation.
//!
//! The truncation pass keeps the message list under a per-model token
//! budget while preserving the system prompt, the latest user message, and
//! every assistant-tool-call / tool-result pairing.

pub mod counter;
pub mod truncation;

pub use counter::{count_message_tokens, count_text_tokens, count_tokens};
pub use truncation::{truncate, TruncationReport};
