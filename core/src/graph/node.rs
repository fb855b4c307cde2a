//! Task DAG node types (§3.1): Root, Task, and Action nodes share one status
//! state machine; Action nodes additionally carry a tool invocation record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which of the three node kinds a `TaskNode` is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Exactly one per operation: holds the goal and the mission-accomplished flag.
    Root,
    /// A subtask: the unit of planning and reflection.
    Task,
    /// A single tool invocation produced by the Executor during a subtask.
    Action,
}

/// Status of a task/root/action node (§3.1 state machine).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Deprecated,
    Aborted,
    Stalled,
}

impl TaskStatus {
    /// Terminal statuses are sticky (I2): no further status change is allowed
    /// once reached, except `Deprecated`, which can only be *entered* from a
    /// non-terminal status and is itself terminal thereafter.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Aborted
                | TaskStatus::Deprecated
                | TaskStatus::Stalled
        )
    }

    /// Whether a transition from `self` to `next` is allowed under I2.
    ///
    /// `pending → in_progress → (completed|failed|aborted)`; any non-terminal
    /// status may move to `deprecated`; terminal statuses accept no further
    /// transition (including a repeat of the same status, which callers should
    /// treat as a no-op rather than route through this check).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, InProgress) => true,
            (Pending, Deprecated) => true,
            (InProgress, Completed | Failed | Aborted) => true,
            (InProgress, Deprecated) => true,
            (Stalled, _) => false,
            _ => false,
        }
    }
}

/// L0..L5 failure attribution assigned by the Reflector (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureLevel {
    L0,
    L1,
    L2,
    L3,
    L4,
    L5,
}

impl FailureLevel {
    /// L0/L1 retry automatically; L2 re-plans the parent task; L3/L4 re-plan
    /// the whole operation; L5 aborts it. See §4.7 and the Scheduler's
    /// `RePlanScope`/abort handling.
    pub fn is_auto_retryable(self) -> bool {
        matches!(self, FailureLevel::L0 | FailureLevel::L1)
    }
}

/// One node in the task DAG. Action-only fields are `None`/empty on Root/Task nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub kind: NodeKind,
    pub description: String,
    #[serde(default)]
    pub completion_criteria: Option<String>,
    pub status: TaskStatus,
    /// Task ids that must be terminal before this node may start (I3).
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Containing task id (for actions) or the root id (for top-level tasks).
    #[serde(default)]
    pub parent: Option<String>,
    pub created_at: u64,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
    /// Opaque payloads attached by the Executor.
    #[serde(default)]
    pub artifacts: Vec<Value>,
    #[serde(default)]
    pub failure_level: Option<FailureLevel>,

    // Action-only fields (I4).
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_args: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub observation: Option<String>,
}

impl TaskNode {
    /// A task is ready (I3) when pending and every dependency is terminal
    /// and none of them ended in `failed`/`deprecated` without being pruned.
    /// Callers pass in the resolved status of each dependency.
    pub fn is_ready(&self, dependency_statuses: &[TaskStatus]) -> bool {
        self.status == TaskStatus::Pending
            && dependency_statuses.iter().all(|s| s.is_terminal())
            && dependency_statuses
                .iter()
                .all(|s| !matches!(s, TaskStatus::Failed | TaskStatus::Deprecated))
    }
}
