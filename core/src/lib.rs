//! # weft-core
//!
//! The cognitive runtime behind an autonomous agent: a **Planner / Executor /
//! Reflector** loop that drives an external LLM through a dynamic task DAG
//! coupled to a causal/belief graph, one **Operation** at a time.
//!
//! ## Design principles
//!
//! - **Dual-graph state store**: one [`graph::GraphStore`] per operation holds
//!   both the task DAG (plan, dispatch, execution) and the causal graph
//!   (evidence, hypotheses, confirmed findings), mutated only through the
//!   small [`graph::GraphCommand`] instruction set, atomically, batch by
//!   batch.
//! - **P-E-R scheduler**: [`scheduler::Scheduler`] is the single top-level
//!   state machine per operation — plan, gate, apply, dispatch up to a
//!   fanout limit, reflect, re-plan or terminate.
//! - **Stable-id arena, not pointers**: every cross-graph reference (a causal
//!   node's `source_action_id`, a task's `dependencies`) is a plain string
//!   id, so [`graph::GraphSnapshot`] is a pure, aliasing-free copy.
//! - **Drivers are pure functions over rendered context**: [`planner`],
//!   [`executor`], and [`reflector`] never touch the Graph Store or Broker
//!   directly — the Scheduler renders their request, applies their reply.
//! - **Ports, not concrete dependencies**: the LLM transport ([`llm::LlmTransport`])
//!   and tool host ([`tool_source::ToolSource`]) are traits; [`llm::StubLlm`]
//!   and the `mcp` adapter are two interchangeable implementations.
//!
//! ## Main modules
//!
//! - [`graph`]: the dual-graph state — [`graph::GraphStore`], [`graph::GraphCommand`],
//!   [`graph::TaskNode`], [`graph::CausalNode`], [`graph::GraphSnapshot`].
//! - [`scheduler`]: [`scheduler::Scheduler`], [`scheduler::SchedulerTunables`],
//!   [`scheduler::OperationOutcome`] — the P-E-R loop for one operation.
//! - [`planner`]: [`planner::PlannerDriver`] — builds the planning prompt, parses
//!   [`planner::PlanReply`].
//! - [`executor`]: [`executor::ExecutorDriver`] — drives one subtask's step loop,
//!   tool invocation, history compaction, and repeated-action detection.
//! - [`reflector`]: [`reflector::ReflectorDriver`] — audits a finished subtask,
//!   attributes failure levels, decides the hard veto.
//! - [`gate`]: [`gate::InterventionGate`] — suspends plan application for a human
//!   decision, or auto-approves when HITL is disabled.
//! - [`broker`]: [`broker::EventBroker`] — per-operation typed pub/sub with bounded
//!   per-subscriber queues and replay-from-seq.
//! - [`llm`]: [`llm::LlmClient`], [`llm::LlmTransport`], [`llm::StubLlm`],
//!   [`llm::OpenAiTransport`] — the role-parameterized `ask()` with its two retry loops.
//! - [`tool_source`]: [`tool_source::ToolSource`], [`tool_source::ToolHostClient`];
//!   MCP adapter in [`tool_source::mcp`].
//! - [`compress`]: [`compress::history`] — byte-threshold transcript compaction for
//!   the Executor's step history.
//! - [`persistence`]: [`persistence::Checkpointer`], [`persistence::InMemoryCheckpointer`],
//!   [`persistence::SqliteCheckpointer`] — crash-consistent per-operation checkpoints.
//! - [`error`]: [`error::CoreError`] — the root error taxonomy every component
//!   converts into at its boundary.
//!
//! Key types are re-exported at crate root: `use weft_core::{Scheduler, GraphStore, CoreError};`.

pub mod broker;
pub mod compress;
pub mod error;
pub mod executor;
pub mod gate;
pub mod graph;
pub mod llm;
pub mod persistence;
pub mod planner;
pub mod reflector;
pub mod scheduler;
pub mod tool_source;

pub use broker::{EventBroker, Subscription};
pub use compress::{accumulated_bytes, compress_if_needed, HistoryCompactionConfig, TranscriptEntry};
pub use error::CoreError;
pub use executor::{
    normalize_action, ExecutionOperation, ExecutorDriver, ExecutorOutcome, ExecutorPolicy,
    ExecutorStep, StagedCausalNode, StopReason, SubtaskContext,
};
pub use gate::{Decision, InterventionGate};
pub use graph::{
    ApplyOutcome, CausalEdge, CausalKind, CausalNode, CausalNodeData, FailureLevel, GraphCommand,
    GraphError, GraphSnapshot, GraphStore, NodeData, NodeKind, RejectedCommand, TaskNode,
    TaskStatus,
};
pub use llm::{LlmClient, LlmError, LlmTransport, OpenAiTransport, RetryPolicy, RoleModels, StubLlm};
pub use persistence::{
    CheckpointError, Checkpointer, InMemoryCheckpointer, OperationCheckpoint, SqliteCheckpointer,
};
pub use planner::{is_stall, PlanReply, PlanRequest, PlannerDriver};
pub use reflector::{
    is_hard_veto, recovery_policy, AuditResult, AuditStatus, FailureAttribution, RecoveryPolicy,
    ReflectReply, ReflectRequest, ReflectorDriver,
};
pub use scheduler::{OperationOutcome, OperationStatus, Scheduler, SchedulerTunables};
pub use tool_source::{ToolCallContent, ToolHostClient, ToolSource, ToolSourceError, ToolSpec};
pub use tool_source::mcp::McpToolSource;

pub use weft_event::{Event, EventBody, InterventionAction, Phase, RejectReason, Role};
