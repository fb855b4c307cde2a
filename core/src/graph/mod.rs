//! The dual-graph core (§3, §4.1): a task DAG tracking execution state plus a
//! causal/belief graph tracking what the agent has learned, mutated only
//! through the small atomic command set in [`command`].

mod causal;
mod command;
mod node;
mod snapshot;
mod store;

pub use causal::{CausalEdge, CausalKind, CausalNode, RELATION_CONTRADICTS, RELATION_EXPLOITS, RELATION_SUPPORTS, RELATION_VALIDATES};
pub use command::{CausalNodeData, GraphCommand, NodeData};
pub use node::{FailureLevel, NodeKind, TaskNode, TaskStatus};
pub use snapshot::GraphSnapshot;
pub use store::{ApplyOutcome, GraphError, GraphStore, RejectedCommand};
