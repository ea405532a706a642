use std::collections::HashMap;

use uuid::Uuid;

use wv_domain::error::Result;
use wv_domain::event::EventKind;
use wv_domain::state::{Artifact, ArtifactKind, ConversationState, DeepResearchState, SearchMode};
use wv_domain::tool::{ContentPart, Message, MessageContent, Role};
use wv_graph::{GraphNode, NodePatch};
use wv_research::{absorb_search_payload, render_source_list, EngineDeps, ResearchEngine};

use super::{emit_final_message, run_tool_loop, LoopOutcome};
use crate::runtime::NodeContext;

/// Runs the deep-research engine, then synthesizes the report: directly
/// in `deep` mode, through the tool loop in `ultra` mode.
pub struct DeepNode;

#[async_trait::async_trait]
impl GraphNode<NodeContext> for DeepNode {
    fn name(&self) -> &str {
        "deep"
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext) -> Result<NodePatch> {
        let mode = state
            .route_decision
            .as_ref()
            .map(|d| d.mode)
            .unwrap_or(SearchMode::Deep);
        let ultra = mode == SearchMode::Ultra;

        let mut research = state.research_state.clone().unwrap_or_else(|| {
            DeepResearchState::new(
                state.last_user_text().unwrap_or_default(),
                ctx.config.research.max_epochs,
            )
        });

        // A resumed turn already carries finished research; don't redo it.
        let needs_research =
            research.final_report.is_none() && (research.summaries.is_empty() || research.should_continue);
        if needs_research {
            let engine = ResearchEngine::new(ctx.config.research.clone());
            let deps = EngineDeps {
                provider: ctx.provider.clone(),
                model: ctx.model.clone(),
                registry: ctx.registry.clone(),
            };
            engine
                .run(
                    &state.thread_id,
                    &mut research,
                    &deps,
                    &ctx.bus,
                    &ctx.cancel,
                    !ultra,
                )
                .await?;
        }

        let source_list = render_source_list(&research);

        // ── Synthesis ─────────────────────────────────────────────────
        if ultra {
            // Tool-assisted synthesis: the model may keep using tools
            // (and approval gates still apply) while writing the report.
            let mut seeded = state.messages.clone();
            seeded.push(Message::system(format!(
                "Research notes (cite sources as [n] from the list):\n\n{}\n\nSources:\n{}",
                research
                    .summaries
                    .iter()
                    .map(|(q, s)| format!("## {q}\n{s}"))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                source_list,
            )));

            let outcome = run_tool_loop(ctx, seeded, &state.enabled_tools, state.approval.clone())
                .await?;
            let max_sources = ctx.config.research.max_sources_per_epoch;
            return Ok(match outcome {
                LoopOutcome::Final {
                    appended,
                    usage,
                    used_approval,
                } => {
                    // Searches the model ran mid-synthesis must land in the
                    // source list too, or their citations resolve nowhere.
                    absorb_loop_searches(&mut research, &appended, max_sources);
                    let report = appended
                        .last()
                        .map(|m| m.content.joined_text())
                        .unwrap_or_default();
                    let artifact = report_artifact(&report, &render_source_list(&research));
                    emit_artifact(ctx, &artifact);
                    NodePatch {
                        messages: appended,
                        artifacts: vec![artifact],
                        research_state: Some(research),
                        usage: Some(usage),
                        clear_approval: used_approval,
                        ..Default::default()
                    }
                }
                LoopOutcome::Interrupted {
                    appended,
                    usage,
                    interrupt,
                    used_approval,
                } => {
                    absorb_loop_searches(&mut research, &appended, max_sources);
                    NodePatch {
                        messages: appended,
                        research_state: Some(research),
                        usage: Some(usage),
                        pending_interrupt: Some(interrupt),
                        clear_approval: used_approval,
                        ..Default::default()
                    }
                }
            });
        }

        let report = research
            .final_report
            .clone()
            .unwrap_or_else(|| "No report could be produced.".to_string());
        let full = format!("{report}\n\nSources:\n{source_list}");

        let artifact = report_artifact(&report, &source_list);
        emit_artifact(ctx, &artifact);
        emit_final_message(ctx, &full);

        Ok(NodePatch {
            messages: vec![Message::assistant(full)],
            artifacts: vec![artifact],
            research_state: Some(research),
            ..Default::default()
        })
    }
}

/// Record every successful `web_search` round from the synthesis tool
/// loop into the research state, through the same canonicalize-and-dedup
/// path the epoch loop uses.
fn absorb_loop_searches(
    research: &mut DeepResearchState,
    appended: &[Message],
    max_sources: usize,
) {
    // call_id -> query of the web_search invocations seen in the loop.
    let mut queries: HashMap<String, String> = HashMap::new();
    for message in appended {
        for call in message.tool_calls() {
            if call.tool_name == "web_search" {
                let query = call
                    .arguments
                    .get("query")
                    .and_then(|q| q.as_str())
                    .unwrap_or_default()
                    .to_string();
                queries.insert(call.call_id, query);
            }
        }

        if message.role != Role::Tool {
            continue;
        }
        let Some(query) = message.tool_call_id.as_deref().and_then(|id| queries.get(id)) else {
            continue;
        };
        let MessageContent::Parts(parts) = &message.content else {
            continue;
        };
        for part in parts {
            let ContentPart::ToolResult {
                content,
                is_error: false,
                ..
            } = part
            else {
                continue;
            };
            let Ok(payload) = serde_json::from_str::<serde_json::Value>(content) else {
                continue;
            };
            let added = absorb_search_payload(research, query, &payload, max_sources);
            if added > 0 {
                tracing::debug!(added, query = %query, "synthesis search results recorded");
            }
        }
    }
}

fn report_artifact(report: &str, source_list: &str) -> Artifact {
    Artifact {
        id: format!("report-{}", Uuid::new_v4()),
        kind: ArtifactKind::Report,
        title: "Research report".into(),
        content: format!("{report}\n\nSources:\n{source_list}"),
        mime: Some("text/markdown".into()),
    }
}

fn emit_artifact(ctx: &NodeContext, artifact: &Artifact) {
    ctx.bus.emit(
        EventKind::Artifact,
        serde_json::to_value(artifact).unwrap_or_default(),
    );
}
