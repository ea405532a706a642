use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Per-tool execution ceiling.
    #[serde(default = "d_60")]
    pub tool_timeout_secs: u64,
    /// Per-LLM-call ceiling.
    #[serde(default = "d_120")]
    pub llm_timeout_secs: u64,
    /// Whole-turn ceiling.
    #[serde(default = "d_600")]
    pub turn_timeout_secs: u64,
    /// Maximum tool-loop iterations inside the agent node.
    #[serde(default = "d_10")]
    pub max_agent_iterations: usize,
    /// Parallel tool dispatch bound.
    #[serde(default = "d_4")]
    pub tool_concurrency: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            llm_timeout_secs: 120,
            turn_timeout_secs: 600,
            max_agent_iterations: 10,
            tool_concurrency: 4,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_60() -> u64 {
    60
}
fn d_120() -> u64 {
    120
}
fn d_600() -> u64 {
    600
}
fn d_10() -> usize {
    10
}
fn d_4() -> usize {
    4
}
