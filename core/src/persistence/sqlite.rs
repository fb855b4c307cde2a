//! SQLite-backed checkpointer. One row per operation, replaced atomically.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::params;

use super::checkpointer::{CheckpointError, Checkpointer, OperationCheckpoint};

/// SQLite-backed checkpointer, keyed by `op_id`.
///
/// Uses `spawn_blocking` for the (synchronous) rusqlite calls, matching the
/// reference framework's own SQLite checkpoint saver. `INSERT OR REPLACE` inside
/// a single statement is SQLite's atomic unit of work: a crash mid-write leaves
/// either the previous row or the new one, never a half-written one (§6.4).
pub struct SqliteCheckpointer {
    db_path: PathBuf,
}

impl SqliteCheckpointer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS operation_checkpoints (
                op_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                graph TEXT NOT NULL,
                event_tail TEXT NOT NULL,
                pending_interventions TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    async fn put(&self, checkpoint: OperationCheckpoint) -> Result<(), CheckpointError> {
        let db_path = self.db_path.clone();
        let graph = serde_json::to_string(&checkpoint.graph)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let event_tail = serde_json::to_string(&checkpoint.event_tail)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let pending = serde_json::to_string(&checkpoint.pending_interventions)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let metadata = serde_json::to_string(&checkpoint.metadata)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO operation_checkpoints
                (op_id, status, graph, event_tail, pending_interventions, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    checkpoint.op_id,
                    checkpoint.status,
                    graph,
                    event_tail,
                    pending,
                    metadata,
                ],
            )
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            Ok::<(), CheckpointError>(())
        })
        .await
        .map_err(|e| CheckpointError::Storage(e.to_string()))?
    }

    async fn get(&self, op_id: &str) -> Result<Option<OperationCheckpoint>, CheckpointError> {
        let db_path = self.db_path.clone();
        let op_id = op_id.to_string();

        type Row = (String, String, String, String, String, String);
        let row: Option<Row> = tokio::task::spawn_blocking(move || -> Result<Option<Row>, CheckpointError> {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT op_id, status, graph, event_tail, pending_interventions, metadata
                     FROM operation_checkpoints WHERE op_id = ?1",
                )
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            let mut rows = stmt
                .query(params![op_id])
                .map_err(|e| CheckpointError::Storage(e.to_string()))?;
            match rows.next().map_err(|e| CheckpointError::Storage(e.to_string()))? {
                Some(r) => Ok(Some((
                    r.get(0).map_err(|e| CheckpointError::Storage(e.to_string()))?,
                    r.get(1).map_err(|e| CheckpointError::Storage(e.to_string()))?,
                    r.get(2).map_err(|e| CheckpointError::Storage(e.to_string()))?,
                    r.get(3).map_err(|e| CheckpointError::Storage(e.to_string()))?,
                    r.get(4).map_err(|e| CheckpointError::Storage(e.to_string()))?,
                    r.get(5).map_err(|e| CheckpointError::Storage(e.to_string()))?,
                ))),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| CheckpointError::Storage(e.to_string()))??;

        let Some((op_id, status, graph, event_tail, pending, metadata)) = row else {
            return Ok(None);
        };
        Ok(Some(OperationCheckpoint {
            op_id,
            status,
            graph: serde_json::from_str(&graph)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
            event_tail: serde_json::from_str(&event_tail)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
            pending_interventions: serde_json::from_str(&pending)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
            metadata: serde_json::from_str(&metadata)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(op_id: &str) -> OperationCheckpoint {
        OperationCheckpoint {
            op_id: op_id.to_string(),
            status: "running".to_string(),
            graph: json!({"task_nodes": []}),
            event_tail: vec![json!({"seq": 1})],
            pending_interventions: vec![],
            metadata: json!({"goal": "probe /login"}),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cp = SqliteCheckpointer::new(dir.path().join("ops.sqlite3")).unwrap();
        cp.put(sample("op-1")).await.unwrap();
        let loaded = cp.get("op-1").await.unwrap().expect("present");
        assert_eq!(loaded.status, "running");
        assert_eq!(loaded.graph["task_nodes"], json!([]));
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cp = SqliteCheckpointer::new(dir.path().join("ops.sqlite3")).unwrap();
        assert!(cp.get("op-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_put_replaces_first() {
        let dir = tempfile::tempdir().unwrap();
        let cp = SqliteCheckpointer::new(dir.path().join("ops.sqlite3")).unwrap();
        cp.put(sample("op-1")).await.unwrap();
        let mut second = sample("op-1");
        second.status = "succeeded".to_string();
        cp.put(second).await.unwrap();
        let loaded = cp.get("op-1").await.unwrap().expect("present");
        assert_eq!(loaded.status, "succeeded");
    }
}
