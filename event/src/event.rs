//! Typed event bodies emitted by the scheduler, graph store, and gate.
//!
//! Each variant's tag is the wire `event` name; its fields are the wire `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which LLM role a request/response event concerns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    Executor,
    Reflector,
}

/// Scheduler phase, carried by `phase.changed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Executing,
    Reflecting,
}

/// One reason a batch was rejected by the graph store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    DuplicateId,
    UnknownId,
    Cycle,
    TerminalViolation,
    InvariantViolation,
}

/// Decision carried by `intervention.resolved`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    Approve,
    Modify,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EventBody {
    #[serde(rename = "graph.changed")]
    GraphChanged {
        batch_id: String,
        node_ids: Vec<String>,
        edge_count: usize,
    },
    #[serde(rename = "graph.rejected")]
    GraphRejected {
        batch_id: String,
        reason: RejectReason,
        detail: String,
    },
    #[serde(rename = "execution.step.completed")]
    ExecutionStepCompleted {
        task_id: String,
        action_id: String,
        status: String,
    },
    #[serde(rename = "llm.request")]
    LlmRequest { prompt_chars: usize },
    #[serde(rename = "llm.response")]
    LlmResponse { ok: bool, retried: u32 },
    #[serde(rename = "intervention.required")]
    InterventionRequired { req_id: String, batch: Value },
    #[serde(rename = "intervention.resolved")]
    InterventionResolved {
        req_id: String,
        action: InterventionAction,
    },
    #[serde(rename = "phase.changed")]
    PhaseChanged { phase: Phase },
    #[serde(rename = "mission.accomplished")]
    MissionAccomplished,
    #[serde(rename = "operation.aborted")]
    OperationAborted { reason: String },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Emitted in place of truncated events when a subscriber's queue overflows.
    #[serde(rename = "overflow")]
    Overflow { dropped: u64 },
}

impl EventBody {
    /// Serializes this body's `{event, data}` shape standalone (no seq/timestamp/role).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_uses_dotted_wire_name() {
        let v = EventBody::GraphChanged {
            batch_id: "b1".into(),
            node_ids: vec!["t1".into()],
            edge_count: 0,
        }
        .to_value()
        .unwrap();
        assert_eq!(v["event"], "graph.changed");
        assert_eq!(v["data"]["batch_id"], "b1");
    }

    #[test]
    fn unit_variant_has_no_data_field_issues() {
        let v = EventBody::Heartbeat.to_value().unwrap();
        assert_eq!(v["event"], "heartbeat");
    }
}
