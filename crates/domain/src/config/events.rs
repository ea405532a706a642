use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Ring-buffer size for replay, per thread.
    #[serde(default = "d_512")]
    pub buffer_size: usize,
    /// Per-subscriber queue bound; a slower subscriber is dropped past this.
    #[serde(default = "d_64")]
    pub subscriber_backlog: usize,
    /// SSE keepalive interval in seconds.
    #[serde(default = "d_15")]
    pub keepalive_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: 512,
            subscriber_backlog: 64,
            keepalive_secs: 15,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_512() -> usize {
    512
}
fn d_64() -> usize {
    64
}
fn d_15() -> u64 {
    15
}
