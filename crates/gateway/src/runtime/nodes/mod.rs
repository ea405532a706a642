//! The turn graph: `route` fans out to `direct`, `web`, `agent`, or
//! `deep` by the router's decision; every terminal node ends the turn.

mod agent;
mod deep;
mod direct;
mod route;
mod web;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use wv_domain::error::{Error, Result};
use wv_domain::event::EventKind;
use wv_domain::state::SearchMode;
use wv_domain::stream::{StreamEvent, Usage};
use wv_domain::tool::{Message, ToolCall, ToolDefinition};
use wv_graph::{Graph, GraphBuilder, END, START};
use wv_providers::{retry::with_retry, ChatRequest};

use super::NodeContext;

pub use agent::{run_tool_loop, LoopOutcome};

/// Compile the turn graph. Called once at startup; shared by all turns.
pub fn build_graph() -> Result<Graph<NodeContext>> {
    GraphBuilder::new()
        .add_node(Arc::new(route::RouteNode))
        .add_node(Arc::new(direct::DirectNode))
        .add_node(Arc::new(web::WebNode))
        .add_node(Arc::new(agent::AgentNode))
        .add_node(Arc::new(deep::DeepNode))
        .add_edge(START, "route")
        .add_conditional("route", |state| {
            let mode = state
                .route_decision
                .as_ref()
                .map(|d| d.mode)
                .unwrap_or(SearchMode::Direct);
            match mode {
                SearchMode::Web => "web".to_string(),
                SearchMode::Agent => "agent".to_string(),
                SearchMode::Deep | SearchMode::Ultra => "deep".to_string(),
                _ => "direct".to_string(),
            }
        })
        .add_edge("direct", END)
        .add_edge("web", END)
        .add_edge("agent", END)
        .add_edge("deep", END)
        .compile()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared LLM streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One streamed LLM exchange, after assembly.
pub(crate) struct LlmTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// Stream one LLM call: emit `text` events for tokens as they arrive and
/// return the accumulated text, completed tool calls, and usage.
///
/// The connect phase gets one backoff retry for transient upstream
/// failures; the whole call sits under the configured LLM timeout.
pub(crate) async fn stream_llm(
    ctx: &NodeContext,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
) -> Result<LlmTurn> {
    let req = ChatRequest {
        messages,
        tools,
        temperature: Some(0.2),
        model: Some(ctx.model.clone()),
        ..Default::default()
    };

    let deadline = Duration::from_secs(ctx.config.runtime.llm_timeout_secs);
    let span = tracing::info_span!("llm.call", model = %ctx.model);
    let _guard = span.enter();

    let consume = async {
        let mut stream = with_retry(
            ctx.config.llm.max_retries,
            ctx.config.llm.retry_base_ms,
            || ctx.provider.chat_stream(&req, &ctx.cancel),
        )
        .await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = None;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Token { text: chunk } => {
                    ctx.bus
                        .emit(EventKind::Text, serde_json::json!({ "text": chunk }));
                    text.push_str(&chunk);
                }
                StreamEvent::ToolCallFinished {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    tool_calls.push(ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    });
                }
                StreamEvent::Done { usage: u, .. } => {
                    usage = u;
                }
                StreamEvent::Error { message } => {
                    return Err(Error::Provider {
                        provider: ctx.provider.provider_id().to_string(),
                        message,
                    });
                }
                // Adapters assemble fragments; nothing to do here.
                StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolCallDelta { .. } => {}
            }
        }

        Ok(LlmTurn {
            text,
            tool_calls,
            usage,
        })
    };

    match tokio::time::timeout(deadline, consume).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "LLM call exceeded {}s",
            ctx.config.runtime.llm_timeout_secs
        ))),
    }
}

/// Emit the full assistant text as a `message` event (sent once after the
/// token stream so clients that skip deltas still get the final content).
pub(crate) fn emit_final_message(ctx: &NodeContext, text: &str) {
    ctx.bus.emit(
        EventKind::Message,
        serde_json::json!({ "role": "assistant", "content": text }),
    );
}
