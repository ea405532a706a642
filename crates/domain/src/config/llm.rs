use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model used when a request does not name one, e.g. "gpt-4o".
    #[serde(default = "d_default_model")]
    pub default_model: String,
    /// Provider id preferred when several are registered.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Registered LLM providers (data-driven: adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Retries for transient upstream failures (attempts = retries + 1).
    #[serde(default = "d_1")]
    pub max_retries: u32,
    /// Base backoff delay between retries.
    #[serde(default = "d_500")]
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_model: d_default_model(),
            default_provider: None,
            providers: Vec::new(),
            max_retries: 1,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI, Azure-style gateways, Ollama, vLLM, and anything else that
    /// speaks the OpenAI chat completions contract.
    OpenaiCompat,
    Anthropic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique id, referenced by "provider/model" specs.
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Direct key (discouraged outside tests).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Models this provider is known to serve; used for request validation.
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    /// Resolve the API key: direct value wins, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_default_model() -> String {
    "gpt-4o".into()
}
fn d_1() -> u32 {
    1
}
fn d_500() -> u64 {
    500
}
