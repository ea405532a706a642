use std::sync::Arc;

use serde::{Deserialize, Serialize};

use wv_checkpoint::Checkpointer;
use wv_domain::cancel::CancelToken;
use wv_domain::error::{Error, Result};
use wv_domain::event::EventKind;
use wv_domain::state::{ApprovalPayload, ConversationState};
use wv_domain::stream::Usage;
use wv_events::ThreadBus;

use crate::graph::{Graph, END};
use crate::patch::NodePatch;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named handler in the graph. Handlers run on the turn's task; they
/// may fan out internally (parallel searches, parallel tools) but must
/// join before returning.
#[async_trait::async_trait]
pub trait GraphNode<C>: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, state: &ConversationState, ctx: &C) -> Result<NodePatch>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The blob the runner hands to the checkpointer: the node to resume
/// from plus the full state.
#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    pub node: String,
    pub state: ConversationState,
}

impl Snapshot {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a run ended. Failures surface as `Err`; the runner has already
/// emitted the matching terminal event in every case.
#[derive(Debug)]
pub enum RunOutcome {
    /// Reached `END`; `done` was emitted.
    Completed {
        state: ConversationState,
        usage: Usage,
    },
    /// Suspended on an interrupt; `interrupt` was emitted and a
    /// checkpoint written. Resume with [`GraphRunner::resume`].
    Interrupted(ConversationState),
    /// The cancel token fired; `error(kind=cancelled)` was emitted.
    Cancelled(ConversationState),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes one graph over one state, checkpointing at node boundaries.
pub struct GraphRunner<C> {
    graph: Arc<Graph<C>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl<C: Send + Sync> GraphRunner<C> {
    pub fn new(graph: Arc<Graph<C>>, checkpointer: Option<Arc<dyn Checkpointer>>) -> Self {
        Self { graph, checkpointer }
    }

    /// Run from the entry node.
    pub async fn run(
        &self,
        state: ConversationState,
        ctx: &C,
        cancel: &CancelToken,
        bus: &ThreadBus,
    ) -> Result<RunOutcome> {
        let entry = self.graph.entry().to_owned();
        self.run_from(entry, state, ctx, cancel, bus).await
    }

    /// Resume a suspended turn: load the latest checkpoint, merge the
    /// approval, clear the interrupt, and re-run the interrupted node.
    pub async fn resume(
        &self,
        thread_id: &str,
        approval: ApprovalPayload,
        ctx: &C,
        cancel: &CancelToken,
        bus: &ThreadBus,
    ) -> Result<RunOutcome> {
        let checkpointer = self.checkpointer.as_ref().ok_or_else(|| {
            Error::Validation("checkpointing is disabled; nothing to resume".into())
        })?;
        let (_, raw) = checkpointer
            .latest(thread_id)
            .await?
            .ok_or_else(|| Error::Validation(format!("no checkpoint for thread {thread_id}")))?;
        let snapshot = Snapshot::decode(&raw)?;

        let mut state = snapshot.state;
        if state.pending_interrupt.is_none() {
            return Err(Error::Validation(format!(
                "thread {thread_id} has no pending interrupt"
            )));
        }
        state.pending_interrupt = None;
        state.approval = Some(approval);

        self.run_from(snapshot.node, state, ctx, cancel, bus).await
    }

    async fn run_from(
        &self,
        mut current: String,
        mut state: ConversationState,
        ctx: &C,
        cancel: &CancelToken,
        bus: &ThreadBus,
    ) -> Result<RunOutcome> {
        let mut checkpoint_seq = self.next_checkpoint_seq(&state.thread_id).await;
        let mut total_usage = Usage::default();

        loop {
            // a. Cancellation gate before each node.
            if cancel.is_cancelled() || state.cancelled {
                state.cancelled = true;
                bus.emit(
                    EventKind::Error,
                    serde_json::json!({ "kind": "cancelled", "message": "turn cancelled" }),
                );
                self.save(&current, &state, &mut checkpoint_seq).await;
                return Ok(RunOutcome::Cancelled(state));
            }

            // b. Run the node.
            tracing::debug!(node = %current, thread_id = %state.thread_id, "running graph node");
            let patch = match self.graph.node(&current)?.run(&state, ctx).await {
                Ok(patch) => patch,
                Err(e) => {
                    // Terminal: surface the failure and leave prior state
                    // checkpointed.
                    tracing::error!(node = %current, error = %e, "graph node failed");
                    bus.emit(
                        EventKind::Error,
                        serde_json::json!({ "kind": e.kind(), "message": e.to_string() }),
                    );
                    self.save(&current, &state, &mut checkpoint_seq).await;
                    return Err(e);
                }
            };

            // c. Merge.
            if let Some(u) = &patch.usage {
                total_usage.accumulate(u);
            }
            let interrupted = patch.pending_interrupt.is_some();
            patch.apply(&mut state);

            // d. Interrupt: checkpoint, emit, suspend.
            if interrupted {
                self.save(&current, &state, &mut checkpoint_seq).await;
                let payload = state
                    .pending_interrupt
                    .as_ref()
                    .and_then(|p| serde_json::to_value(p).ok())
                    .unwrap_or_default();
                bus.emit(EventKind::Interrupt, payload);
                return Ok(RunOutcome::Interrupted(state));
            }

            // e. Checkpoint and advance.
            self.save(&current, &state, &mut checkpoint_seq).await;
            let next = self.graph.successor(&current, &state)?;
            if next == END {
                bus.emit(
                    EventKind::Done,
                    serde_json::json!({
                        "thread_id": state.thread_id,
                        "usage": {
                            "prompt_tokens": total_usage.prompt_tokens,
                            "completion_tokens": total_usage.completion_tokens,
                            "total_tokens": total_usage.total_tokens,
                        },
                    }),
                );
                return Ok(RunOutcome::Completed {
                    state,
                    usage: total_usage,
                });
            }
            current = next;
        }
    }

    async fn next_checkpoint_seq(&self, thread_id: &str) -> u64 {
        match &self.checkpointer {
            Some(cp) => match cp.latest(thread_id).await {
                Ok(Some((seq, _))) => seq + 1,
                _ => 1,
            },
            None => 1,
        }
    }

    /// Best-effort checkpoint write; failures are logged, never fatal.
    async fn save(&self, node: &str, state: &ConversationState, seq: &mut u64) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        let snapshot = Snapshot {
            node: node.to_owned(),
            state: state.clone(),
        };
        match snapshot.encode() {
            Ok(raw) => {
                if let Err(e) = checkpointer.put(&state.thread_id, *seq, &raw).await {
                    tracing::warn!(error = %e, thread_id = %state.thread_id, "checkpoint write failed");
                } else {
                    *seq += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "checkpoint snapshot serialization failed");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, START};
    use futures_util::StreamExt;
    use wv_checkpoint::MemoryCheckpointer;
    use wv_domain::config::EventsConfig;
    use wv_domain::state::InterruptPayload;
    use wv_domain::tool::Message;
    use wv_events::EventBus;

    /// Minimal test context.
    struct Ctx;

    struct AppendNode {
        name: &'static str,
        text: &'static str,
    }

    #[async_trait::async_trait]
    impl GraphNode<Ctx> for AppendNode {
        fn name(&self) -> &str {
            self.name
        }
        async fn run(&self, _state: &ConversationState, _ctx: &Ctx) -> Result<NodePatch> {
            Ok(NodePatch::with_message(Message::assistant(self.text)))
        }
    }

    struct FailingNode;

    #[async_trait::async_trait]
    impl GraphNode<Ctx> for FailingNode {
        fn name(&self) -> &str {
            "boom"
        }
        async fn run(&self, _state: &ConversationState, _ctx: &Ctx) -> Result<NodePatch> {
            Err(Error::Internal("node exploded".into()))
        }
    }

    /// Interrupts on first visit, completes after approval.
    struct GateNode;

    #[async_trait::async_trait]
    impl GraphNode<Ctx> for GateNode {
        fn name(&self) -> &str {
            "gate"
        }
        async fn run(&self, state: &ConversationState, _ctx: &Ctx) -> Result<NodePatch> {
            if state.approval.is_some() {
                Ok(NodePatch {
                    messages: vec![Message::assistant("approved, proceeding")],
                    clear_approval: true,
                    ..Default::default()
                })
            } else {
                Ok(NodePatch {
                    pending_interrupt: Some(InterruptPayload {
                        tool_calls: vec![],
                        reason: "needs approval".into(),
                    }),
                    ..Default::default()
                })
            }
        }
    }

    fn two_node_graph() -> Arc<Graph<Ctx>> {
        Arc::new(
            GraphBuilder::new()
                .add_node(Arc::new(AppendNode { name: "a", text: "from a" }))
                .add_node(Arc::new(AppendNode { name: "b", text: "from b" }))
                .add_edge(START, "a")
                .add_edge("a", "b")
                .add_edge("b", END)
                .compile()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn runs_to_end_and_emits_done() {
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let mut events = thread.subscribe(Some(0));

        let runner = GraphRunner::new(two_node_graph(), None);
        let outcome = runner
            .run(ConversationState::new("t1"), &Ctx, &CancelToken::new(), &thread)
            .await
            .unwrap();

        let RunOutcome::Completed { state, .. } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(state.messages.len(), 2);
        let done = events.next().await.unwrap();
        assert_eq!(done.kind, EventKind::Done);
    }

    #[tokio::test]
    async fn checkpoints_every_node_boundary() {
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let cp: Arc<dyn Checkpointer> = Arc::new(MemoryCheckpointer::new());

        let runner = GraphRunner::new(two_node_graph(), Some(cp.clone()));
        runner
            .run(ConversationState::new("t1"), &Ctx, &CancelToken::new(), &thread)
            .await
            .unwrap();

        let metas = cp.list("t1").await.unwrap();
        assert_eq!(metas.len(), 2);
        let (_, raw) = cp.latest("t1").await.unwrap().unwrap();
        let snapshot = Snapshot::decode(&raw).unwrap();
        assert_eq!(snapshot.node, "b");
        assert_eq!(snapshot.state.messages.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_emits_cancelled_error() {
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let mut events = thread.subscribe(Some(0));

        let cancel = CancelToken::new();
        cancel.cancel();
        let runner = GraphRunner::new(two_node_graph(), None);
        let outcome = runner
            .run(ConversationState::new("t1"), &Ctx, &cancel, &thread)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Cancelled(_)));
        let ev = events.next().await.unwrap();
        assert_eq!(ev.kind, EventKind::Error);
        assert_eq!(ev.data["kind"], "cancelled");
    }

    #[tokio::test]
    async fn node_failure_emits_error_and_propagates() {
        let graph = Arc::new(
            GraphBuilder::new()
                .add_node(Arc::new(FailingNode))
                .add_edge(START, "boom")
                .add_edge("boom", END)
                .compile()
                .unwrap(),
        );
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let mut events = thread.subscribe(Some(0));

        let runner = GraphRunner::new(graph, None);
        let err = runner
            .run(ConversationState::new("t1"), &Ctx, &CancelToken::new(), &thread)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal");

        let ev = events.next().await.unwrap();
        assert_eq!(ev.kind, EventKind::Error);
        assert_eq!(ev.data["kind"], "internal");
    }

    #[tokio::test]
    async fn interrupt_suspends_then_resume_completes() {
        let graph = Arc::new(
            GraphBuilder::new()
                .add_node(Arc::new(GateNode))
                .add_edge(START, "gate")
                .add_edge("gate", END)
                .compile()
                .unwrap(),
        );
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let mut events = thread.subscribe(Some(0));
        let cp: Arc<dyn Checkpointer> = Arc::new(MemoryCheckpointer::new());
        let runner = GraphRunner::new(graph, Some(cp.clone()));

        // First run suspends.
        let outcome = runner
            .run(ConversationState::new("t1"), &Ctx, &CancelToken::new(), &thread)
            .await
            .unwrap();
        let RunOutcome::Interrupted(state) = outcome else {
            panic!("expected interrupt");
        };
        assert!(state.pending_interrupt.is_some());
        assert_eq!(events.next().await.unwrap().kind, EventKind::Interrupt);

        // Resume from the checkpoint.
        let outcome = runner
            .resume(
                "t1",
                ApprovalPayload { tool_approved: true, note: None },
                &Ctx,
                &CancelToken::new(),
                &thread,
            )
            .await
            .unwrap();
        let RunOutcome::Completed { state, .. } = outcome else {
            panic!("expected completion after resume");
        };
        assert!(state.pending_interrupt.is_none());
        assert!(state.approval.is_none(), "gate consumed the approval");
        assert_eq!(
            state.messages.last().unwrap().content.joined_text(),
            "approved, proceeding"
        );
        assert_eq!(events.next().await.unwrap().kind, EventKind::Done);
    }

    #[tokio::test]
    async fn resume_without_checkpoint_fails_validation() {
        let runner = GraphRunner::new(
            two_node_graph(),
            Some(Arc::new(MemoryCheckpointer::new()) as Arc<dyn Checkpointer>),
        );
        let bus = EventBus::new(EventsConfig::default());
        let thread = bus.thread("t1");
        let err = runner
            .resume(
                "t1",
                ApprovalPayload { tool_approved: true, note: None },
                &Ctx,
                &CancelToken::new(),
                &thread,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn builder_rejects_missing_edges() {
        let result = GraphBuilder::<Ctx>::new()
            .add_node(Arc::new(AppendNode { name: "a", text: "x" }))
            .add_edge(START, "a")
            .compile();
        assert!(result.is_err(), "node without outgoing edge must fail");
    }

    #[test]
    fn builder_rejects_unknown_entry() {
        let result = GraphBuilder::<Ctx>::new()
            .add_node(Arc::new(AppendNode { name: "a", text: "x" }))
            .add_edge(START, "ghost")
            .add_edge("a", END)
            .compile();
        assert!(result.is_err());
    }
}
