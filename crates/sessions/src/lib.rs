//! Thread registry.
//!
//! Tracks every conversation thread the server has seen: timestamps,
//! token usage, and message counts, persisted as `threads.json` under the
//! state path. Conversation state itself lives in the checkpointer; this
//! store backs thread listing and request validation.

mod store;

pub use store::{ThreadEntry, ThreadStore};
