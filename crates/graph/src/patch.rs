use wv_domain::state::{
    Artifact, ConversationState, DeepResearchState, InterruptPayload, RouteDecision,
};
use wv_domain::stream::Usage;
use wv_domain::tool::Message;

/// What a node hands back: appends and scalar overwrites, merged by the
/// runner. Returning an empty patch is valid (pure-routing nodes).
#[derive(Default)]
pub struct NodePatch {
    /// Appended to `state.messages`.
    pub messages: Vec<Message>,
    /// Appended to `state.artifacts`; duplicates by id are ignored.
    pub artifacts: Vec<Artifact>,
    pub route_decision: Option<RouteDecision>,
    pub research_state: Option<DeepResearchState>,
    /// Setting this suspends the graph after the merge.
    pub pending_interrupt: Option<InterruptPayload>,
    /// Consume the approval that resumed this node.
    pub clear_approval: bool,
    /// Token usage incurred by this node; the runner aggregates it for
    /// the `done` event.
    pub usage: Option<Usage>,
}

impl NodePatch {
    pub fn with_message(message: Message) -> Self {
        Self {
            messages: vec![message],
            ..Default::default()
        }
    }

    /// Merge this patch into the state: append-only for messages and
    /// artifacts, overwrite-if-set for scalars.
    pub fn apply(self, state: &mut ConversationState) {
        state.messages.extend(self.messages);
        for artifact in self.artifacts {
            if !state.artifacts.iter().any(|a| a.id == artifact.id) {
                state.artifacts.push(artifact);
            }
        }
        if let Some(decision) = self.route_decision {
            state.route_decision = Some(decision);
        }
        if let Some(research) = self.research_state {
            state.research_state = Some(research);
        }
        if let Some(interrupt) = self.pending_interrupt {
            state.pending_interrupt = Some(interrupt);
        }
        if self.clear_approval {
            state.approval = None;
        }
    }
}
