use wv_domain::error::Result;
use wv_domain::event::EventKind;
use wv_domain::state::ConversationState;
use wv_graph::{GraphNode, NodePatch};

use crate::runtime::{router, NodeContext};

/// Decides the execution mode and writes `route_decision`; the outgoing
/// conditional edge does the actual branching.
pub struct RouteNode;

#[async_trait::async_trait]
impl GraphNode<NodeContext> for RouteNode {
    fn name(&self) -> &str {
        "route"
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext) -> Result<NodePatch> {
        ctx.bus
            .emit(EventKind::Status, serde_json::json!({ "text": "routing" }));

        let latest = state.last_user_text().unwrap_or_default();
        let decision =
            router::route(&ctx.provider, &ctx.model, &latest, state.search_mode).await;

        tracing::info!(
            mode = decision.mode.as_str(),
            confidence = decision.confidence,
            rationale = %decision.rationale,
            "route decided"
        );
        ctx.bus.emit(
            EventKind::Status,
            serde_json::json!({
                "text": decision.mode.as_str(),
                "confidence": decision.confidence,
                "rationale": decision.rationale,
            }),
        );

        Ok(NodePatch {
            route_decision: Some(decision),
            ..Default::default()
        })
    }
}
