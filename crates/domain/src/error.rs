/// Shared error type used across all Weaver crates.
///
/// Variants map onto the runtime's error taxonomy: `Validation` surfaces as
/// HTTP 400 before streaming starts and as a terminal `error` event after;
/// `Tool` is recoverable inside the agent loop; `Timeout`, `Cancelled`,
/// `Provider` and `Internal` terminate the turn.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("checkpoint: {0}")]
    Checkpoint(String),

    #[error("checkpoint not found: thread {thread_id} seq {seq}")]
    CheckpointNotFound { thread_id: String, seq: u64 },

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// The taxonomy kind string carried in terminal `error` events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::DuplicateTool(_) => "validation",
            Error::Tool { .. } => "tool",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Provider { .. } | Error::Http(_) => "upstream",
            _ => "internal",
        }
    }

    /// Whether the agent loop may continue after this error (it becomes a
    /// failed tool message instead of aborting the turn).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Tool { .. } | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_follow_taxonomy() {
        assert_eq!(Error::Validation("x".into()).kind(), "validation");
        assert_eq!(Error::Cancelled.kind(), "cancelled");
        assert_eq!(Error::Timeout("llm".into()).kind(), "timeout");
        assert_eq!(
            Error::Provider {
                provider: "openai".into(),
                message: "503".into()
            }
            .kind(),
            "upstream"
        );
        assert_eq!(Error::Internal("boom".into()).kind(), "internal");
    }

    #[test]
    fn tool_errors_are_recoverable() {
        assert!(Error::Tool {
            tool: "web_search".into(),
            message: "no results".into()
        }
        .is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
        assert!(!Error::Internal("x".into()).is_recoverable());
    }
}
