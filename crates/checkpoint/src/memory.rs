use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use wv_domain::error::{Error, Result};

use crate::{Checkpointer, CheckpointMeta};

/// In-memory checkpointer. Used in tests and when durability is not
/// required; state is lost on restart.
#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, BTreeMap<u64, Stored>>>,
}

#[derive(Clone)]
struct Stored {
    snapshot: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn put(&self, thread_id: &str, seq: u64, snapshot: &str) -> Result<()> {
        self.threads
            .write()
            .entry(thread_id.to_owned())
            .or_default()
            .insert(
                seq,
                Stored {
                    snapshot: snapshot.to_owned(),
                    created_at: chrono::Utc::now(),
                },
            );
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<(u64, String)>> {
        Ok(self.threads.read().get(thread_id).and_then(|m| {
            m.iter()
                .next_back()
                .map(|(seq, s)| (*seq, s.snapshot.clone()))
        }))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>> {
        Ok(self
            .threads
            .read()
            .get(thread_id)
            .map(|m| {
                m.iter()
                    .map(|(seq, s)| CheckpointMeta {
                        seq: *seq,
                        created_at: s.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn restore(&self, thread_id: &str, seq: u64) -> Result<String> {
        self.threads
            .read()
            .get(thread_id)
            .and_then(|m| m.get(&seq))
            .map(|s| s.snapshot.clone())
            .ok_or(Error::CheckpointNotFound {
                thread_id: thread_id.to_owned(),
                seq,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_latest_restore() {
        let cp = MemoryCheckpointer::new();
        cp.put("t1", 1, "{\"a\":1}").await.unwrap();
        cp.put("t1", 2, "{\"a\":2}").await.unwrap();

        let (seq, snap) = cp.latest("t1").await.unwrap().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(snap, "{\"a\":2}");
        assert_eq!(cp.restore("t1", 1).await.unwrap(), "{\"a\":1}");
    }

    #[tokio::test]
    async fn restore_missing_is_not_found() {
        let cp = MemoryCheckpointer::new();
        let err = cp.restore("t1", 9).await.unwrap_err();
        assert!(matches!(err, Error::CheckpointNotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_ascending() {
        let cp = MemoryCheckpointer::new();
        cp.put("t1", 3, "{}").await.unwrap();
        cp.put("t1", 1, "{}").await.unwrap();
        cp.put("t1", 2, "{}").await.unwrap();
        let seqs: Vec<u64> = cp.list("t1").await.unwrap().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn latest_empty_thread_is_none() {
        let cp = MemoryCheckpointer::new();
        assert!(cp.latest("nope").await.unwrap().is_none());
    }
}
