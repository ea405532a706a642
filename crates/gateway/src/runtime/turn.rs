//! Turn controller — validates a chat request, assembles the initial
//! conversation state (prior checkpoint + request), and drives the graph
//! on a spawned task while events flow to subscribers through the bus.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use wv_context::truncate;
use wv_domain::cancel::CancelToken;
use wv_domain::error::{Error, Result};
use wv_domain::event::EventKind;
use wv_domain::state::{ApprovalPayload, ConversationState, SearchMode};
use wv_domain::tool::{ContentPart, Message};
use wv_graph::{GraphRunner, RunOutcome, Snapshot};

use crate::runtime::NodeContext;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatTurnRequest {
    pub messages: Vec<IncomingMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub agent_profile: Option<AgentProfile>,
    #[serde(default)]
    pub images: Vec<IncomingImage>,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentProfile {
    /// Tool name -> enabled flag.
    #[serde(default)]
    pub enabled_tools: BTreeMap<String, bool>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingImage {
    pub name: String,
    pub mime: String,
    /// Base64 payload.
    pub data: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pre-stream request validation; failures map to HTTP 400.
pub fn validate(app: &AppState, req: &ChatTurnRequest) -> Result<()> {
    if req.messages.is_empty() {
        return Err(Error::Validation("messages must not be empty".into()));
    }
    if req.messages.last().map(|m| m.role.as_str()) != Some("user") {
        return Err(Error::Validation("last message must be from the user".into()));
    }
    if let Some(model) = req.model.as_deref() {
        if !app.llm.knows_model(model) {
            return Err(Error::Validation(format!("unknown model: {model}")));
        }
    }
    if let Some(profile) = &req.agent_profile {
        let registry = app.tools.load();
        for (name, enabled) in &profile.enabled_tools {
            if *enabled && !registry.contains(name) {
                return Err(Error::Validation(format!("unauthorized tool: {name}")));
            }
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A validated turn, ready to spawn.
pub struct PreparedTurn {
    pub thread_id: String,
    pub conversation: ConversationState,
    pub cancel: CancelToken,
    pub ctx: NodeContext,
    /// The context manager cut history; announced at turn start.
    pub context_truncated: bool,
}

/// Build the initial state: prior checkpoint (if any) merged with the
/// request, truncated to the context budget.
pub async fn prepare(app: &AppState, req: &ChatTurnRequest) -> Result<PreparedTurn> {
    let thread_id = req
        .thread_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    app.threads.resolve_or_create(&thread_id);

    // ── Restore prior conversation from the checkpointer ─────────────
    let mut conversation = ConversationState::new(&thread_id);
    let mut has_history = false;
    if let Some(checkpointer) = &app.checkpointer {
        if let Some((_, raw)) = checkpointer.latest(&thread_id).await? {
            match Snapshot::decode(&raw) {
                Ok(snapshot) => {
                    conversation = snapshot.state;
                    has_history = true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, thread_id = %thread_id, "undecodable checkpoint, starting fresh");
                }
            }
        }
    }

    // Per-turn fields reset; messages carry over.
    conversation.thread_id = thread_id.clone();
    conversation.route_decision = None;
    conversation.artifacts.clear();
    conversation.research_state = None;
    conversation.pending_interrupt = None;
    conversation.approval = None;
    conversation.cancelled = false;
    conversation.search_mode = req.search_mode;

    // ── Append request messages ──────────────────────────────────────
    // With server-side history the client's replayed prefix is ignored;
    // only the new user message lands. Fresh threads take the whole list.
    if has_history {
        if let Some(last) = req.messages.last() {
            conversation.messages.push(incoming_to_message(last));
        }
    } else {
        for incoming in &req.messages {
            conversation.messages.push(incoming_to_message(incoming));
        }
    }

    // Images ride on the latest user message as data URLs.
    if !req.images.is_empty() {
        attach_images(&mut conversation, &req.images);
    }

    // ── Enabled tools ────────────────────────────────────────────────
    let registry = app.tools.load();
    conversation.enabled_tools = match &req.agent_profile {
        Some(profile) => profile
            .enabled_tools
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect(),
        None => registry.list(|_| true).iter().map(|d| d.name().to_string()).collect(),
    };

    // ── Context budget ───────────────────────────────────────────────
    let bus = app.events.thread(&thread_id);
    let (truncated, report) = truncate(
        &conversation.messages,
        app.config.context.max_context_tokens,
        app.config.context.truncation_strategy,
    );
    if report.changed {
        tracing::info!(
            dropped = report.dropped_messages,
            forced = report.forced_tail_cut,
            "context truncated"
        );
    }
    conversation.messages = truncated;

    // ── Execution context ────────────────────────────────────────────
    let (provider, model) = app.llm.resolve(req.model.as_deref())?;
    let cancel = app.cancel_map.register(&thread_id);
    let ctx = NodeContext {
        thread_id: thread_id.clone(),
        config: app.config.clone(),
        provider,
        model,
        registry,
        bus,
        cancel: cancel.clone(),
    };

    Ok(PreparedTurn {
        thread_id,
        conversation,
        cancel,
        ctx,
        context_truncated: report.changed,
    })
}

fn incoming_to_message(incoming: &IncomingMessage) -> Message {
    match incoming.role.as_str() {
        "system" => Message::system(&incoming.content),
        "assistant" => Message::assistant(&incoming.content),
        _ => Message::user(&incoming.content),
    }
}

fn attach_images(conversation: &mut ConversationState, images: &[IncomingImage]) {
    let Some(last_user) = conversation
        .messages
        .iter_mut()
        .rev()
        .find(|m| m.role == wv_domain::tool::Role::User)
    else {
        return;
    };
    let mut parts = vec![ContentPart::Text {
        text: last_user.content.joined_text(),
    }];
    for image in images {
        parts.push(ContentPart::Image {
            url: format!("data:{};base64,{}", image.mime, image.data),
            media_type: Some(image.mime.clone()),
        });
    }
    last_user.content = wv_domain::tool::MessageContent::Parts(parts);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the graph for a prepared turn. Events stream through the bus;
/// the task cleans up its cancel token and records usage when done.
pub fn spawn_turn(app: AppState, prepared: PreparedTurn) {
    let PreparedTurn {
        thread_id,
        conversation,
        cancel,
        ctx,
        context_truncated,
    } = prepared;

    let span = tracing::info_span!("turn", thread_id = %thread_id);
    tokio::spawn(async move {
        let _guard = span.enter();
        let runner = GraphRunner::new(app.graph.clone(), app.checkpointer.clone());
        let deadline = Duration::from_secs(app.config.runtime.turn_timeout_secs);
        let bus = ctx.bus.clone();

        if context_truncated {
            bus.emit(
                EventKind::Status,
                serde_json::json!({ "text": "context_truncated" }),
            );
        }

        let result = tokio::time::timeout(
            deadline,
            runner.run(conversation, &ctx, &cancel, &bus),
        )
        .await;

        finish_turn(&app, &thread_id, result);
    });
}

/// Resume a suspended turn with an approval payload.
pub fn spawn_resume(app: AppState, thread_id: String, approval: ApprovalPayload) -> Result<()> {
    if app.checkpointer.is_none() {
        return Err(Error::Validation(
            "checkpointing is disabled; interrupts cannot be resumed".into(),
        ));
    }
    let (provider, model) = app.llm.resolve(None)?;
    let bus = app.events.thread(&thread_id);
    let cancel = app.cancel_map.register(&thread_id);
    let ctx = NodeContext {
        thread_id: thread_id.clone(),
        config: app.config.clone(),
        provider,
        model,
        registry: app.tools.load(),
        bus: bus.clone(),
        cancel: cancel.clone(),
    };

    let span = tracing::info_span!("turn.resume", thread_id = %thread_id);
    tokio::spawn(async move {
        let _guard = span.enter();
        let runner = GraphRunner::new(app.graph.clone(), app.checkpointer.clone());
        let deadline = Duration::from_secs(app.config.runtime.turn_timeout_secs);

        let result = tokio::time::timeout(
            deadline,
            runner.resume(&thread_id, approval, &ctx, &cancel, &bus),
        )
        .await;

        finish_turn(&app, &thread_id, result);
    });
    Ok(())
}

fn finish_turn(
    app: &AppState,
    thread_id: &str,
    result: std::result::Result<Result<RunOutcome>, tokio::time::error::Elapsed>,
) {
    match result {
        Ok(Ok(RunOutcome::Completed { state, usage })) => {
            app.threads.record_turn(
                thread_id,
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
                state.messages.len(),
            );
        }
        Ok(Ok(RunOutcome::Interrupted(_))) => {
            tracing::info!(thread_id, "turn suspended on interrupt");
            app.threads.touch(thread_id);
        }
        Ok(Ok(RunOutcome::Cancelled(_))) => {
            tracing::info!(thread_id, "turn cancelled");
            app.threads.touch(thread_id);
        }
        Ok(Err(e)) => {
            // The runner already emitted the terminal error event.
            tracing::error!(thread_id, error = %e, "turn failed");
            app.threads.touch(thread_id);
        }
        Err(_) => {
            // Whole-turn ceiling: the runner was dropped mid-await, so
            // emit the terminal event here.
            tracing::error!(thread_id, "turn exceeded the whole-turn timeout");
            app.events.emit(
                thread_id,
                EventKind::Error,
                serde_json::json!({
                    "kind": "timeout",
                    "message": format!(
                        "turn exceeded {}s",
                        app.config.runtime.turn_timeout_secs
                    ),
                }),
            );
        }
    }
    app.cancel_map.remove(thread_id);
    if let Err(e) = app.threads.flush() {
        tracing::warn!(error = %e, "thread store flush failed");
    }
}
