use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use wv_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single conversation thread tracked by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub turns: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    /// Messages in the last checkpointed state.
    #[serde(default)]
    pub message_count: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed registry of threads.
pub struct ThreadStore {
    path: PathBuf,
    threads: RwLock<HashMap<String, ThreadEntry>>,
}

impl ThreadStore {
    /// Load or create the store at `state_path/threads.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let path = state_path.join("threads.json");
        let threads = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            threads = threads.len(),
            path = %path.display(),
            "thread store loaded"
        );

        Ok(Self {
            path,
            threads: RwLock::new(threads),
        })
    }

    pub fn get(&self, thread_id: &str) -> Option<ThreadEntry> {
        self.threads.read().get(thread_id).cloned()
    }

    /// Resolve or create a thread. Returns `(entry, is_new)`.
    pub fn resolve_or_create(&self, thread_id: &str) -> (ThreadEntry, bool) {
        {
            let threads = self.threads.read();
            if let Some(entry) = threads.get(thread_id) {
                return (entry.clone(), false);
            }
        }

        let now = Utc::now();
        let entry = ThreadEntry {
            thread_id: thread_id.to_owned(),
            created_at: now,
            updated_at: now,
            turns: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            message_count: 0,
        };
        self.threads
            .write()
            .insert(thread_id.to_owned(), entry.clone());
        tracing::info!(thread_id, "new thread created");
        (entry, true)
    }

    /// Record a completed turn's usage and message count.
    pub fn record_turn(
        &self,
        thread_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        message_count: usize,
    ) {
        let mut threads = self.threads.write();
        if let Some(entry) = threads.get_mut(thread_id) {
            entry.turns += 1;
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.total_tokens += input_tokens + output_tokens;
            entry.message_count = message_count;
            entry.updated_at = Utc::now();
        }
    }

    pub fn touch(&self, thread_id: &str) {
        let mut threads = self.threads.write();
        if let Some(entry) = threads.get_mut(thread_id) {
            entry.updated_at = Utc::now();
        }
    }

    /// All entries, most recently updated first.
    pub fn list(&self) -> Vec<ThreadEntry> {
        let mut entries: Vec<ThreadEntry> = self.threads.read().values().cloned().collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }

    /// Persist the current registry to disk (atomic rename).
    pub fn flush(&self) -> Result<()> {
        let threads = self.threads.read();
        let json = serde_json::to_string_pretty(&*threads)
            .map_err(|e| Error::Internal(format!("serializing threads: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
