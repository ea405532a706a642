//! Core runtime — the turn controller, intent router, graph nodes, and
//! tool dispatch that tie the subsystem crates into one deterministic
//! execution path per turn.

pub mod cancel;
pub mod dispatch;
pub mod nodes;
pub mod router;
pub mod turn;

use std::sync::Arc;

use wv_domain::cancel::CancelToken;
use wv_domain::config::Config;
use wv_events::ThreadBus;
use wv_providers::LlmProvider;
use wv_tools::ToolRegistry;

/// Everything a graph node needs for one turn: the resolved provider and
/// model, the tool snapshot loaded at turn start, the thread's event bus,
/// and the turn's cancel token.
pub struct NodeContext {
    pub thread_id: String,
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    /// Frozen snapshot; a registry swap mid-turn does not affect us.
    pub registry: Arc<ToolRegistry>,
    pub bus: Arc<ThreadBus>,
    pub cancel: CancelToken,
}

/// Truncate a string for event payloads and log previews.
pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
