use std::sync::Arc;

use wv_checkpoint::Checkpointer;
use wv_domain::config::Config;
use wv_events::EventBus;
use wv_graph::Graph;
use wv_providers::ProviderRegistry;
use wv_sessions::ThreadStore;
use wv_tools::SharedRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::NodeContext;

/// Shared application state passed to all API handlers.
///
/// Every field is an explicitly-initialized process-wide service; nothing
/// here is a global. Construction happens once in [`crate::bootstrap`].
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub tools: Arc<SharedRegistry>,

    // ── Per-thread infrastructure ─────────────────────────────────────
    pub events: Arc<EventBus>,
    pub threads: Arc<ThreadStore>,
    /// `None` when checkpointing is disabled in config.
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    pub cancel_map: Arc<CancelMap>,

    // ── Execution ─────────────────────────────────────────────────────
    /// The compiled turn graph, shared by every turn.
    pub graph: Arc<Graph<NodeContext>>,
}
