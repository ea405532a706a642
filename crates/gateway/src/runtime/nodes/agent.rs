use std::collections::BTreeSet;

use wv_domain::error::{Error, Result};
use wv_domain::event::EventKind;
use wv_domain::state::{ApprovalPayload, ConversationState, InterruptPayload};
use wv_domain::stream::Usage;
use wv_domain::tool::{Message, ToolCall};
use wv_graph::{GraphNode, NodePatch};

use super::{emit_final_message, stream_llm};
use crate::runtime::dispatch::dispatch_tool_calls;
use crate::runtime::NodeContext;

/// The tool loop: the LLM may request tools, the runtime executes them
/// and feeds results back, until the LLM answers in plain text or the
/// iteration cap forces a final answer.
pub struct AgentNode;

#[async_trait::async_trait]
impl GraphNode<NodeContext> for AgentNode {
    fn name(&self) -> &str {
        "agent"
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext) -> Result<NodePatch> {
        let outcome = run_tool_loop(
            ctx,
            state.messages.clone(),
            &state.enabled_tools,
            state.approval.clone(),
        )
        .await?;

        Ok(match outcome {
            LoopOutcome::Final {
                appended,
                usage,
                used_approval,
            } => NodePatch {
                messages: appended,
                usage: Some(usage),
                clear_approval: used_approval,
                ..Default::default()
            },
            LoopOutcome::Interrupted {
                appended,
                usage,
                interrupt,
                used_approval,
            } => NodePatch {
                messages: appended,
                usage: Some(usage),
                pending_interrupt: Some(interrupt),
                clear_approval: used_approval,
                ..Default::default()
            },
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a tool loop ended. `appended` holds only the messages added on
/// top of the input (the caller merges them as a patch).
pub enum LoopOutcome {
    Final {
        appended: Vec<Message>,
        usage: Usage,
        used_approval: bool,
    },
    /// An approval-gated tool was requested with no approval on hand.
    Interrupted {
        appended: Vec<Message>,
        usage: Usage,
        interrupt: InterruptPayload,
        used_approval: bool,
    },
}

/// Drive the LLM/tool loop over `base`.
///
/// Resumability falls out of the message shape: if `base` already ends
/// with an unanswered assistant tool-call round (a resumed turn), the
/// loop executes that round first instead of calling the LLM again.
pub async fn run_tool_loop(
    ctx: &NodeContext,
    base: Vec<Message>,
    enabled_tools: &BTreeSet<String>,
    approval: Option<ApprovalPayload>,
) -> Result<LoopOutcome> {
    let initial_len = base.len();
    let mut working = base;
    let mut total_usage = Usage::default();
    let mut approval = approval;
    let mut used_approval = false;
    let mut rounds = 0usize;
    let max_rounds = ctx.config.runtime.max_agent_iterations;

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // ── Pending tool round (fresh from the LLM, or resumed) ──────
        if let Some(calls) = unanswered_tail_calls(&working) {
            let gated = calls.iter().any(|c| {
                ctx.registry
                    .get(&c.tool_name)
                    .is_some_and(|d| d.requires_approval)
            });

            if gated && approval.is_none() {
                // Do not emit tool_start for held calls; the interrupt
                // event carries them instead.
                return Ok(LoopOutcome::Interrupted {
                    appended: working.split_off(initial_len),
                    usage: total_usage,
                    interrupt: InterruptPayload {
                        tool_calls: calls,
                        reason: "tool requires approval".into(),
                    },
                    used_approval,
                });
            }

            let approved = match approval.take() {
                Some(a) => {
                    used_approval = true;
                    a.tool_approved
                }
                None => true,
            };

            if approved {
                let outcomes = dispatch_tool_calls(ctx, &calls).await;
                for (call, outcome) in calls.iter().zip(outcomes) {
                    working.push(if outcome.success {
                        Message::tool_result(&call.call_id, &outcome.content)
                    } else {
                        Message::tool_error(&call.call_id, &outcome.content)
                    });
                }
            } else {
                for call in &calls {
                    ctx.bus.emit(
                        EventKind::ToolError,
                        serde_json::json!({
                            "call_id": call.call_id,
                            "tool_name": call.tool_name,
                            "content": "denied by user",
                            "success": false,
                        }),
                    );
                    working.push(Message::tool_error(&call.call_id, "denied by user"));
                }
            }

            rounds += 1;
            continue;
        }

        // ── LLM call ─────────────────────────────────────────────────
        // Past the round cap the model gets no tools, forcing an answer.
        let tools = if rounds < max_rounds {
            ctx.registry
                .definitions_for(|name| enabled_tools.contains(name))
        } else {
            tracing::warn!(rounds, "tool loop cap reached, forcing final answer");
            Vec::new()
        };

        let turn = stream_llm(ctx, working.clone(), tools).await?;
        if let Some(u) = &turn.usage {
            total_usage.accumulate(u);
        }

        if turn.tool_calls.is_empty() {
            emit_final_message(ctx, &turn.text);
            working.push(Message::assistant(turn.text));
            return Ok(LoopOutcome::Final {
                appended: working.split_off(initial_len),
                usage: total_usage,
                used_approval,
            });
        }

        working.push(Message::assistant_with_tool_calls(
            &turn.text,
            &turn.tool_calls,
        ));
    }
}

/// If the conversation tail is an assistant tool-call round with missing
/// tool results, return the unanswered calls.
fn unanswered_tail_calls(messages: &[Message]) -> Option<Vec<ToolCall>> {
    let mut answered: Vec<&str> = Vec::new();
    for message in messages.iter().rev() {
        match message.role {
            wv_domain::tool::Role::Tool => {
                if let Some(id) = message.tool_call_id.as_deref() {
                    answered.push(id);
                }
            }
            wv_domain::tool::Role::Assistant => {
                let calls: Vec<ToolCall> = message
                    .tool_calls()
                    .into_iter()
                    .filter(|c| !answered.contains(&c.call_id.as_str()))
                    .collect();
                return if calls.is_empty() { None } else { Some(calls) };
            }
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            tool_name: "web_search".into(),
            arguments: serde_json::json!({ "query": "x" }),
        }
    }

    #[test]
    fn tail_with_unanswered_calls_is_detected() {
        let messages = vec![
            Message::user("q"),
            Message::assistant_with_tool_calls("", &[call("c1"), call("c2")]),
            Message::tool_result("c1", "done"),
        ];
        let pending = unanswered_tail_calls(&messages).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].call_id, "c2");
    }

    #[test]
    fn fully_answered_tail_is_none() {
        let messages = vec![
            Message::user("q"),
            Message::assistant_with_tool_calls("", &[call("c1")]),
            Message::tool_result("c1", "done"),
        ];
        assert!(unanswered_tail_calls(&messages).is_none());
    }

    #[test]
    fn plain_assistant_tail_is_none() {
        let messages = vec![Message::user("q"), Message::assistant("answer")];
        assert!(unanswered_tail_calls(&messages).is_none());
    }

    #[test]
    fn user_tail_is_none() {
        let messages = vec![
            Message::assistant_with_tool_calls("", &[call("c1")]),
            Message::user("new question"),
        ];
        assert!(unanswered_tail_calls(&messages).is_none());
    }
}
