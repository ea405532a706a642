use wv_domain::error::Result;
use wv_domain::state::ConversationState;
use wv_domain::tool::Message;
use wv_graph::{GraphNode, NodePatch};

use super::{emit_final_message, stream_llm};
use crate::runtime::NodeContext;

/// One streamed LLM call, no tools.
pub struct DirectNode;

#[async_trait::async_trait]
impl GraphNode<NodeContext> for DirectNode {
    fn name(&self) -> &str {
        "direct"
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext) -> Result<NodePatch> {
        let turn = stream_llm(ctx, state.messages.clone(), Vec::new()).await?;
        emit_final_message(ctx, &turn.text);

        Ok(NodePatch {
            messages: vec![Message::assistant(turn.text)],
            usage: turn.usage,
            ..Default::default()
        })
    }
}
