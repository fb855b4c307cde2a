//! The graph mutation wire format (§3.3, §6.2): a small tagged-union command
//! set, produced by the Planner and Reflector and applied atomically by the
//! `GraphStore`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::causal::CausalKind;
use super::node::NodeKind;

/// The constructible fields of a new task/root/action node. Everything else
/// on `TaskNode` (`status`, `created_at`, ...) is derived by the store at
/// insertion time, not supplied by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeData {
    pub id: String,
    pub kind: NodeKind,
    pub description: String,
    #[serde(default)]
    pub completion_criteria: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_args: Option<Value>,
}

/// The constructible fields of a new causal node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CausalNodeData {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source_action_id: Option<String>,
}

/// One graph mutation command. Tagged on the wire by `command` per §6.2.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum GraphCommand {
    #[serde(rename = "ADD_NODE")]
    AddNode { node_data: NodeData },

    #[serde(rename = "UPDATE_NODE")]
    UpdateNode { id: String, updates: Value },

    #[serde(rename = "ADD_EDGE")]
    AddEdge {
        source: String,
        target: String,
        #[serde(default)]
        relation: Option<String>,
        #[serde(default)]
        confidence: Option<f64>,
    },

    #[serde(rename = "DEPRECATE_NODE")]
    DeprecateNode { id: String, reason: String },

    #[serde(rename = "ADD_CAUSAL_NODE")]
    AddCausalNode {
        variant: CausalKind,
        fields: CausalNodeData,
    },

    #[serde(rename = "ADD_CAUSAL_EDGE")]
    AddCausalEdge {
        source: String,
        target: String,
        relation: String,
        confidence: f64,
    },
}
