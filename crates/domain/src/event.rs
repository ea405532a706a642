//! The event envelope carried by the per-thread event bus.
//!
//! Events are the only channel between the running graph and SSE
//! subscribers. Sequence numbers are assigned by the bus at emit time and
//! are strictly monotonic per thread, starting at 1.

use serde::{Deserialize, Serialize};

/// Every event type the runtime can emit on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Text,
    Message,
    ToolStart,
    ToolProgress,
    ToolResult,
    ToolError,
    ToolScreenshot,
    Artifact,
    Interrupt,
    ResearchNodeStart,
    ResearchNodeComplete,
    ResearchTreeUpdate,
    Search,
    QualityUpdate,
    Done,
    Error,
    /// Sent to a subscriber whose queue overflowed; the client is expected
    /// to reconnect with `Last-Event-ID`.
    Dropped,
}

impl EventKind {
    /// Whether this event closes the stream for the turn.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error)
    }
}

/// An event as seen by bus subscribers and SSE clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Strictly monotonic per thread, starts at 1.
    pub seq: u64,
    pub event_id: uuid::Uuid,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(seq: u64, kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            seq,
            event_id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp(),
            kind,
            data,
        }
    }
}
