//! `GraphSnapshot` (§9): a deep-cloned, serializable view of both graphs,
//! returned by `GraphStore::snapshot()`. Holding one aliases nothing live in
//! the store, which is what makes round-trip serialization (R1) a pure
//! identity check.

use serde::{Deserialize, Serialize};

use super::causal::{CausalEdge, CausalNode};
use super::node::TaskNode;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub task_nodes: Vec<TaskNode>,
    /// `(source, target)`: source must be terminal before target may start.
    pub task_edges: Vec<(String, String)>,
    pub causal_nodes: Vec<CausalNode>,
    pub causal_edges: Vec<CausalEdge>,
}
