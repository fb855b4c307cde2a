//! In-memory checkpointer. Not persistent; backs unit tests and hosts that opt out
//! of persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::checkpointer::{CheckpointError, Checkpointer, OperationCheckpoint};

#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: Arc<RwLock<HashMap<String, OperationCheckpoint>>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn put(&self, checkpoint: OperationCheckpoint) -> Result<(), CheckpointError> {
        let mut guard = self.inner.write().await;
        guard.insert(checkpoint.op_id.clone(), checkpoint);
        Ok(())
    }

    async fn get(&self, op_id: &str) -> Result<Option<OperationCheckpoint>, CheckpointError> {
        let guard = self.inner.read().await;
        Ok(guard.get(op_id).cloned())
    }
}
