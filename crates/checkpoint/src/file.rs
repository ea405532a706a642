use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use wv_domain::error::{Error, Result};

use crate::{Checkpointer, CheckpointMeta};

/// One JSON file per thread under the checkpoint directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so
/// a crash mid-write leaves the previous file intact.
pub struct FileCheckpointer {
    dir: PathBuf,
    /// Serializes read-modify-write cycles across concurrent turns.
    /// Distinct threads contend only briefly.
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize, Default)]
struct ThreadFile {
    checkpoints: Vec<StoredCheckpoint>,
}

#[derive(Serialize, Deserialize, Clone)]
struct StoredCheckpoint {
    seq: u64,
    created_at: chrono::DateTime<chrono::Utc>,
    snapshot: String,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "file checkpointer ready");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        // Thread ids are minted as UUIDs but may arrive from clients;
        // anything outside a conservative set is escaped.
        let safe: String = thread_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn read_file(path: &Path) -> Result<ThreadFile> {
        if !path.exists() {
            return Ok(ThreadFile::default());
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Checkpoint(format!("corrupt checkpoint file {}: {e}", path.display())))
    }

    fn write_file(path: &Path, file: &ThreadFile) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(file)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Checkpointer for FileCheckpointer {
    async fn put(&self, thread_id: &str, seq: u64, snapshot: &str) -> Result<()> {
        let path = self.path_for(thread_id);
        let _guard = self.write_lock.lock();
        let mut file = Self::read_file(&path)?;
        file.checkpoints.retain(|c| c.seq != seq);
        file.checkpoints.push(StoredCheckpoint {
            seq,
            created_at: chrono::Utc::now(),
            snapshot: snapshot.to_owned(),
        });
        file.checkpoints.sort_by_key(|c| c.seq);
        Self::write_file(&path, &file)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<(u64, String)>> {
        let file = Self::read_file(&self.path_for(thread_id))?;
        Ok(file
            .checkpoints
            .last()
            .map(|c| (c.seq, c.snapshot.clone())))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>> {
        let file = Self::read_file(&self.path_for(thread_id))?;
        Ok(file
            .checkpoints
            .iter()
            .map(|c| CheckpointMeta {
                seq: c.seq,
                created_at: c.created_at,
            })
            .collect())
    }

    async fn restore(&self, thread_id: &str, seq: u64) -> Result<String> {
        let file = Self::read_file(&self.path_for(thread_id))?;
        file.checkpoints
            .iter()
            .find(|c| c.seq == seq)
            .map(|c| c.snapshot.clone())
            .ok_or(Error::CheckpointNotFound {
                thread_id: thread_id.to_owned(),
                seq,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpointer() -> (tempfile::TempDir, FileCheckpointer) {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpointer::new(dir.path().join("checkpoints")).unwrap();
        (dir, cp)
    }

    #[tokio::test]
    async fn roundtrip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("checkpoints");
        {
            let cp = FileCheckpointer::new(&root).unwrap();
            cp.put("t1", 1, "{\"n\":\"route\"}").await.unwrap();
            cp.put("t1", 2, "{\"n\":\"agent\"}").await.unwrap();
        }
        let cp = FileCheckpointer::new(&root).unwrap();
        let (seq, snap) = cp.latest("t1").await.unwrap().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(snap, "{\"n\":\"agent\"}");
    }

    #[tokio::test]
    async fn put_same_seq_overwrites() {
        let (_dir, cp) = checkpointer();
        cp.put("t1", 1, "old").await.unwrap();
        cp.put("t1", 1, "new").await.unwrap();
        assert_eq!(cp.restore("t1", 1).await.unwrap(), "new");
        assert_eq!(cp.list("t1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let (_dir, cp) = checkpointer();
        cp.put("a", 1, "a1").await.unwrap();
        cp.put("b", 1, "b1").await.unwrap();
        assert_eq!(cp.restore("a", 1).await.unwrap(), "a1");
        assert_eq!(cp.restore("b", 1).await.unwrap(), "b1");
    }

    #[tokio::test]
    async fn hostile_thread_id_stays_inside_dir() {
        let (_dir, cp) = checkpointer();
        cp.put("../../etc/passwd", 1, "x").await.unwrap();
        // The escaped file lands inside the checkpoint dir.
        assert_eq!(cp.restore("../../etc/passwd", 1).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn missing_seq_is_not_found() {
        let (_dir, cp) = checkpointer();
        cp.put("t1", 1, "x").await.unwrap();
        assert!(matches!(
            cp.restore("t1", 7).await.unwrap_err(),
            Error::CheckpointNotFound { .. }
        ));
    }
}
