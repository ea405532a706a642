//! The conversation state mutated by the graph runtime, plus the value
//! types embedded in it: route decisions, artifacts, interrupts, and the
//! deep-research working set.
//!
//! The state is exclusively owned by the executing graph task; serialized
//! copies go to the checkpointer at node boundaries.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::tool::{Message, ToolCall};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search mode & routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution mode for a turn. `Auto` (the empty string on the wire) lets
/// the router decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    #[serde(rename = "")]
    Auto,
    Direct,
    Web,
    Agent,
    Deep,
    /// Deep research with tool-assisted synthesis.
    Ultra,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Auto => "",
            SearchMode::Direct => "direct",
            SearchMode::Web => "web",
            SearchMode::Agent => "agent",
            SearchMode::Deep => "deep",
            SearchMode::Ultra => "ultra",
        }
    }

    /// Modes that run the deep-research engine.
    pub fn is_deep(self) -> bool {
        matches!(self, SearchMode::Deep | SearchMode::Ultra)
    }
}

/// The router's verdict for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub mode: SearchMode,
    /// In `[0, 1]`. 1.0 for an explicit user override.
    pub confidence: f64,
    pub rationale: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Artifacts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Report,
    Code,
    Chart,
    Data,
}

/// A structured output surfaced alongside the assistant message.
/// Created once, never mutated; unique by `id` within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub kind: ArtifactKind,
    pub title: String,
    /// Text, or base64 for binary payloads.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interrupts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Payload of a suspended approval gate. While set on the state, the graph
/// is parked and the turn has ended with an `interrupt` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptPayload {
    /// The tool calls awaiting approval.
    pub tool_calls: Vec<ToolCall>,
    pub reason: String,
}

/// The payload delivered on resume. `tool_approved=false` turns the held
/// calls into denied tool results instead of executing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub tool_approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deep research
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One retrieved source. Index position in `DeepResearchState::sources`
/// is the stable citation number (first-appearance order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    /// Canonical URL (fragment stripped, tracking params removed,
    /// scheme/host lowercased).
    pub url: String,
    pub snippet: String,
    /// Provider relevance score in `[0, 1]`.
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<chrono::NaiveDate>,
    /// Epoch (1-based) in which this URL was first retained.
    pub epoch_found: u32,
    /// The sub-query that retrieved this source.
    #[serde(default)]
    pub sub_query: String,
}

/// Quality metrics for one research epoch. All fractions in `[0, 1]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityScores {
    pub coverage: f64,
    pub citation: f64,
    pub consistency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freshness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Working set of the multi-epoch research loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepResearchState {
    pub original_query: String,
    pub sub_queries: Vec<String>,
    /// Current epoch, 1-based. Never exceeds `max_epochs`.
    pub epoch: u32,
    pub max_epochs: u32,
    /// Canonical URLs already retained. Never shrinks; each epoch's new
    /// sources are URL-disjoint from prior epochs.
    pub seen_urls: BTreeSet<String>,
    /// All retained sources in first-appearance order.
    pub sources: Vec<Source>,
    /// Grounded summary per sub-query.
    pub summaries: BTreeMap<String, String>,
    pub quality: QualityScores,
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
}

impl DeepResearchState {
    pub fn new(original_query: impl Into<String>, max_epochs: u32) -> Self {
        Self {
            original_query: original_query.into(),
            sub_queries: Vec::new(),
            epoch: 1,
            max_epochs,
            seen_urls: BTreeSet::new(),
            sources: Vec::new(),
            summaries: BTreeMap::new(),
            quality: QualityScores::default(),
            should_continue: true,
            final_report: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The value a graph run mutates. Serialized wholesale into checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: String,
    /// Append-only within a turn; truncated between turns by the context
    /// manager.
    pub messages: Vec<Message>,
    #[serde(default)]
    pub search_mode: SearchMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_decision: Option<RouteDecision>,
    /// Unique by id; append-only.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_state: Option<DeepResearchState>,
    /// When set, the graph is suspended awaiting approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<InterruptPayload>,
    /// Approval merged in by the resume entrypoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalPayload>,
    /// Tool names authorized for this turn.
    #[serde(default)]
    pub enabled_tools: BTreeSet<String>,
    /// Monotonic: false → true once.
    #[serde(default)]
    pub cancelled: bool,
}

impl ConversationState {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            search_mode: SearchMode::Auto,
            route_decision: None,
            artifacts: Vec::new(),
            research_state: None,
            pending_interrupt: None,
            approval: None,
            enabled_tools: BTreeSet::new(),
            cancelled: false,
        }
    }

    /// The most recent user message's text, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::tool::Role::User)
            .map(|m| m.content.joined_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_mode_wire_format() {
        assert_eq!(serde_json::to_value(SearchMode::Auto).unwrap(), "");
        assert_eq!(serde_json::to_value(SearchMode::Deep).unwrap(), "deep");
        let m: SearchMode = serde_json::from_value(serde_json::json!("ultra")).unwrap();
        assert_eq!(m, SearchMode::Ultra);
        assert!(m.is_deep());
    }

    #[test]
    fn last_user_text_picks_most_recent() {
        let mut state = ConversationState::new("t1");
        state.messages.push(Message::user("first"));
        state.messages.push(Message::assistant("reply"));
        state.messages.push(Message::user("second"));
        assert_eq!(state.last_user_text().as_deref(), Some("second"));
    }

    #[test]
    fn research_state_starts_at_epoch_one() {
        let rs = DeepResearchState::new("q", 3);
        assert_eq!(rs.epoch, 1);
        assert!(rs.should_continue);
        assert!(rs.seen_urls.is_empty());
    }

    #[test]
    fn conversation_state_roundtrips_through_json() {
        let mut state = ConversationState::new("t9");
        state.messages.push(Message::user("hello"));
        state.enabled_tools.insert("web_search".into());
        state.pending_interrupt = Some(InterruptPayload {
            tool_calls: vec![],
            reason: "approval required".into(),
        });
        let json = serde_json::to_string(&state).unwrap();
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.thread_id, "t9");
        assert_eq!(back.messages.len(), 1);
        assert!(back.pending_interrupt.is_some());
        assert!(back.enabled_tools.contains("web_search"));
    }
}
