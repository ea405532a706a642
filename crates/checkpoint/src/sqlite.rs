use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use wv_domain::error::{Error, Result};

use crate::{Checkpointer, CheckpointMeta};

/// Sqlite-backed checkpointer: one row per `(thread_id, seq)`.
///
/// All access goes through a single connection behind a mutex; individual
/// statements are short, so contention stays negligible at turn cadence.
pub struct SqliteCheckpointer {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointer {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id  TEXT    NOT NULL,
                seq        INTEGER NOT NULL,
                snapshot   TEXT    NOT NULL,
                created_at TEXT    NOT NULL,
                PRIMARY KEY (thread_id, seq)
            );
            "#,
        )
        .map_err(db_err)?;
        tracing::info!(path = %path.display(), "sqlite checkpointer ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id  TEXT    NOT NULL,
                seq        INTEGER NOT NULL,
                snapshot   TEXT    NOT NULL,
                created_at TEXT    NOT NULL,
                PRIMARY KEY (thread_id, seq)
            );
            "#,
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Checkpoint(e.to_string())
}

#[async_trait::async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn put(&self, thread_id: &str, seq: u64, snapshot: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (thread_id, seq, snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                thread_id,
                seq as i64,
                snapshot,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<(u64, String)>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT seq, snapshot FROM checkpoints
             WHERE thread_id = ?1 ORDER BY seq DESC LIMIT 1",
            params![thread_id],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(db_err)
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT seq, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY seq ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![thread_id], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, created_at) = row.map_err(db_err)?;
            let created_at = created_at
                .parse::<chrono::DateTime<chrono::Utc>>()
                .map_err(|e| Error::Checkpoint(format!("bad timestamp: {e}")))?;
            out.push(CheckpointMeta { seq, created_at });
        }
        Ok(out)
    }

    async fn restore(&self, thread_id: &str, seq: u64) -> Result<String> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT snapshot FROM checkpoints WHERE thread_id = ?1 AND seq = ?2",
            params![thread_id, seq as i64],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(db_err)?
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
    async fn put_latest_list_restore() {
        let cp = SqliteCheckpointer::open_in_memory().unwrap();
        cp.put("t1", 1, "one").await.unwrap();
        cp.put("t1", 2, "two").await.unwrap();

        assert_eq!(cp.latest("t1").await.unwrap().unwrap(), (2, "two".into()));
        let seqs: Vec<u64> = cp.list("t1").await.unwrap().iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(cp.restore("t1", 1).await.unwrap(), "one");
    }

    #[tokio::test]
    async fn replace_same_seq() {
        let cp = SqliteCheckpointer::open_in_memory().unwrap();
        cp.put("t1", 1, "old").await.unwrap();
        cp.put("t1", 1, "new").await.unwrap();
        assert_eq!(cp.restore("t1", 1).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn missing_is_not_found() {
        let cp = SqliteCheckpointer::open_in_memory().unwrap();
        assert!(matches!(
            cp.restore("ghost", 1).await.unwrap_err(),
            Error::CheckpointNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.db");
        {
            let cp = SqliteCheckpointer::open(&path).unwrap();
            cp.put("t1", 5, "persisted").await.unwrap();
        }
        let cp = SqliteCheckpointer::open(&path).unwrap();
        assert_eq!(cp.restore("t1", 5).await.unwrap(), "persisted");
    }
}
