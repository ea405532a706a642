use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the message history sent to the model.
    #[serde(default = "d_budget")]
    pub max_context_tokens: usize,
    #[serde(default)]
    pub truncation_strategy: TruncationStrategy,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: d_budget(),
            truncation_strategy: TruncationStrategy::default(),
        }
    }
}

/// How history is shed when it exceeds the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationStrategy {
    /// Keep the system prompt and the latest user message; drop the oldest
    /// non-essential messages first.
    #[default]
    Smart,
    /// Drop from the head, preserving the system prompt.
    Fifo,
    /// Keep head and tail, drop the middle.
    Middle,
}

impl std::str::FromStr for TruncationStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smart" => Ok(TruncationStrategy::Smart),
            "fifo" => Ok(TruncationStrategy::Fifo),
            "middle" => Ok(TruncationStrategy::Middle),
            _ => Err(()),
        }
    }
}

fn d_budget() -> usize {
    128_000
}
