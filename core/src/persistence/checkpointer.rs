//! Checkpointer trait and the persisted-state shape for one operation.
//!
//! Saves and loads one [`OperationCheckpoint`] per operation id. Unlike the
//! per-thread, per-channel checkpoint shape a conversation-state graph needs, an
//! operation has exactly one current snapshot: the dual graph, the tail of its
//! event log, its pending intervention requests, and its metadata/status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the Core must be able to recover after a crash, for one operation.
///
/// `graph`, `event_tail`, `pending_interventions`, and `metadata` are stored as
/// [`serde_json::Value`] rather than concrete types so the persistence layer does
/// not depend on the graph/broker/gate modules; callers serialize their own
/// `GraphSnapshot`, `Vec<weft_event::Event>`, and pending-request list into them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationCheckpoint {
    pub op_id: String,
    pub status: String,
    pub graph: Value,
    pub event_tail: Vec<Value>,
    pub pending_interventions: Vec<Value>,
    pub metadata: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Saves and loads the current [`OperationCheckpoint`] for an operation.
///
/// Implementations: [`crate::persistence::InMemoryCheckpointer`] (dev, tests),
/// [`crate::persistence::SqliteCheckpointer`] (single-node, production).
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Replaces the stored checkpoint for `checkpoint.op_id` atomically: a reader
    /// never observes a partially-written checkpoint (§6.4).
    async fn put(&self, checkpoint: OperationCheckpoint) -> Result<(), CheckpointError>;

    /// Loads the current checkpoint for `op_id`, or `None` if never checkpointed.
    async fn get(&self, op_id: &str) -> Result<Option<OperationCheckpoint>, CheckpointError>;
}
