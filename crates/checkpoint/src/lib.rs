//! Checkpoint persistence.
//!
//! The graph runtime depends only on the [`Checkpointer`] capability;
//! backends are selected from config: in-memory (tests), one JSON file
//! per thread, or a sqlite database. Writes are atomic; reads see the
//! most recent successful write.

mod file;
mod memory;
mod sqlite;

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;
pub use sqlite::SqliteCheckpointer;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use wv_domain::config::{CheckpointBackend, CheckpointConfig};
use wv_domain::error::Result;

/// Listing entry for a stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub seq: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Persistence capability for graph state snapshots.
///
/// Snapshots are opaque to this layer: the runtime serializes its state
/// (plus the node to resume from) into a JSON string before handing it
/// over.
#[async_trait::async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist a snapshot. Overwrites an existing `(thread_id, seq)`.
    async fn put(&self, thread_id: &str, seq: u64, snapshot: &str) -> Result<()>;

    /// The snapshot with the highest seq, if any.
    async fn latest(&self, thread_id: &str) -> Result<Option<(u64, String)>>;

    /// All stored checkpoints for a thread, ascending by seq.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>>;

    /// A specific snapshot, or `CheckpointNotFound`.
    async fn restore(&self, thread_id: &str, seq: u64) -> Result<String>;
}

/// Build the configured backend. `None` disables checkpointing entirely
/// (the runtime skips snapshot writes and interrupts cannot resume across
/// restarts).
pub fn from_config(
    config: &CheckpointConfig,
    state_path: &std::path::Path,
) -> Result<Option<Arc<dyn Checkpointer>>> {
    match config.backend {
        CheckpointBackend::None => Ok(None),
        CheckpointBackend::File => {
            let dir = match &config.dsn {
                Some(dsn) => std::path::PathBuf::from(dsn),
                None => state_path.join("checkpoints"),
            };
            Ok(Some(Arc::new(FileCheckpointer::new(dir)?)))
        }
        CheckpointBackend::Sql => {
            let path = match &config.dsn {
                Some(dsn) => std::path::PathBuf::from(dsn),
                None => state_path.join("checkpoints.db"),
            };
            Ok(Some(Arc::new(SqliteCheckpointer::open(&path)?)))
        }
    }
}
