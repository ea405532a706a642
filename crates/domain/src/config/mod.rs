mod checkpoint;
mod context;
mod events;
mod llm;
mod research;
mod runtime;
mod server;

pub use checkpoint::*;
pub use context::*;
pub use events::*;
pub use llm::*;
pub use research::*;
pub use runtime::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl Config {
    /// Parse a TOML config file, then apply environment overrides.
    pub fn load(raw: &str) -> crate::error::Result<Self> {
        let mut config: Config = toml::from_str(raw)
            .map_err(|e| crate::error::Error::Config(format!("parsing config: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Apply the recognized environment keys on top of file values.
    ///
    /// Unparseable values are logged and ignored rather than aborting.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MODEL_DEFAULT") {
            self.llm.default_model = v;
        }
        if let Ok(v) = std::env::var("LLM_PROVIDER") {
            self.llm.default_provider = Some(v);
        }
        env_parse("MAX_CONTEXT_TOKENS", &mut self.context.max_context_tokens);
        if let Ok(v) = std::env::var("TRUNCATION_STRATEGY") {
            match v.parse() {
                Ok(s) => self.context.truncation_strategy = s,
                Err(_) => tracing::warn!(value = %v, "invalid TRUNCATION_STRATEGY, ignoring"),
            }
        }
        env_parse("DEEP_MAX_EPOCHS", &mut self.research.max_epochs);
        env_parse("DEEP_MAX_SUBQUERIES", &mut self.research.max_sub_queries);
        env_parse("DEEP_FRESHNESS_DAYS", &mut self.research.freshness_window_days);
        env_parse("TOOL_TIMEOUT_SECONDS", &mut self.runtime.tool_timeout_secs);
        env_parse("TURN_TIMEOUT_SECONDS", &mut self.runtime.turn_timeout_secs);
        if let Ok(v) = std::env::var("CHECKPOINTER") {
            match v.parse() {
                Ok(b) => self.checkpoint.backend = b,
                Err(_) => tracing::warn!(value = %v, "invalid CHECKPOINTER, ignoring"),
            }
        }
        if let Ok(v) = std::env::var("CHECKPOINTER_DSN") {
            self.checkpoint.dsn = Some(v);
        }
        env_parse("EVENT_BUFFER_SIZE", &mut self.events.buffer_size);
    }

    /// Validate the configuration, returning all issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.context.max_context_tokens == 0 {
            issues.push(ConfigIssue::error(
                "context.max_context_tokens",
                "must be greater than zero",
            ));
        }
        if self.research.max_epochs == 0 {
            issues.push(ConfigIssue::error("research.max_epochs", "must be at least 1"));
        }
        if self.research.max_sub_queries == 0 {
            issues.push(ConfigIssue::error(
                "research.max_sub_queries",
                "must be at least 1",
            ));
        }
        if self.events.buffer_size == 0 {
            issues.push(ConfigIssue::error("events.buffer_size", "must be at least 1"));
        }
        if self.checkpoint.backend != CheckpointBackend::None && self.checkpoint.dsn.is_none() {
            issues.push(ConfigIssue::warning(
                "checkpoint.dsn",
                "no DSN configured; using the default path under the state directory",
            ));
        }
        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue::warning(
                "llm.providers",
                "no providers configured; turns will fail until one is added",
            ));
        }

        issues
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "unparseable env override, ignoring"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }
    fn warning(field: &str, message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
