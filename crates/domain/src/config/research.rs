use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deep research
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "d_3")]
    pub max_epochs: u32,
    #[serde(default = "d_5")]
    pub max_sub_queries: usize,
    #[serde(default = "d_15")]
    pub max_sources_per_epoch: usize,
    /// Sources older than this window count against freshness.
    #[serde(default = "d_30")]
    pub freshness_window_days: i64,
    /// Parallel search fan-out bound.
    #[serde(default = "d_5u")]
    pub search_concurrency: usize,
    /// Parallel summarize fan-out bound.
    #[serde(default = "d_3u")]
    pub summarize_concurrency: usize,
    /// Continue another epoch while coverage is below this.
    #[serde(default = "d_cov")]
    pub coverage_target: f64,
    /// Continue another epoch while citation is below this.
    #[serde(default = "d_cit")]
    pub citation_target: f64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_epochs: 3,
            max_sub_queries: 5,
            max_sources_per_epoch: 15,
            freshness_window_days: 30,
            search_concurrency: 5,
            summarize_concurrency: 3,
            coverage_target: 0.8,
            citation_target: 0.7,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_5() -> usize {
    5
}
fn d_15() -> usize {
    15
}
fn d_30() -> i64 {
    30
}
fn d_5u() -> usize {
    5
}
fn d_3u() -> usize {
    3
}
fn d_cov() -> f64 {
    0.8
}
fn d_cit() -> f64 {
    0.7
}
