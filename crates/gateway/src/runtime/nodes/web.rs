use uuid::Uuid;

use wv_domain::error::Result;
use wv_domain::state::ConversationState;
use wv_domain::tool::{Message, ToolCall};
use wv_graph::{GraphNode, NodePatch};

use super::{emit_final_message, stream_llm};
use crate::runtime::dispatch::dispatch_tool_calls;
use crate::runtime::NodeContext;

/// One web search, then one LLM call grounded in the results.
pub struct WebNode;

#[async_trait::async_trait]
impl GraphNode<NodeContext> for WebNode {
    fn name(&self) -> &str {
        "web"
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext) -> Result<NodePatch> {
        let query = state.last_user_text().unwrap_or_default();

        let call = ToolCall {
            call_id: format!("web-{}", Uuid::new_v4()),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({ "query": query, "max_results": 8 }),
        };
        let outcomes = dispatch_tool_calls(ctx, std::slice::from_ref(&call)).await;
        let outcome = &outcomes[0];

        // A failed search still reaches the LLM as context; the model can
        // answer from knowledge or explain the gap.
        let assistant = Message::assistant_with_tool_calls("", std::slice::from_ref(&call));
        let tool_message = if outcome.success {
            Message::tool_result(&call.call_id, &outcome.content)
        } else {
            Message::tool_error(&call.call_id, &outcome.content)
        };

        let mut messages = state.messages.clone();
        messages.push(assistant.clone());
        messages.push(tool_message.clone());
        messages.push(Message::system(
            "Answer the user's question using the search results above. \
             Cite the relevant result URLs inline.",
        ));

        let turn = stream_llm(ctx, messages, Vec::new()).await?;
        emit_final_message(ctx, &turn.text);

        Ok(NodePatch {
            messages: vec![assistant, tool_message, Message::assistant(turn.text)],
            usage: turn.usage,
            ..Default::default()
        })
    }
}
