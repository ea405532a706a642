use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpointing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Backend-specific location: a directory for `file`, a database path
    /// for `sql`. Defaults to a path under the server state directory.
    #[serde(default)]
    pub dsn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Checkpointing disabled; interrupts and restore are unavailable.
    None,
    #[default]
    File,
    Sql,
}

impl std::str::FromStr for CheckpointBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CheckpointBackend::None),
            "file" => Ok(CheckpointBackend::File),
            "sql" | "sqlite" => Ok(CheckpointBackend::Sql),
            _ => Err(()),
        }
    }
}
