//! Scheduler / P-E-R Loop (§4.9): the top-level per-operation state machine —
//! `PLAN → [intervention] → APPLY → DISPATCH → EXECUTE* → REFLECT → {RE-PLAN |
//! TERMINATE | CONTINUE} → FINALIZE` — owning the Graph Store, Event Broker,
//! and Intervention Gate, and driving the Planner/Executor/Reflector drivers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use weft_event::{EventBody, Phase, Role};

use crate::error::CoreError;
use crate::executor::{ExecutorDriver, ExecutorOutcome, StopReason, SubtaskContext};
use crate::gate::{Decision, InterventionGate};
use crate::graph::{GraphCommand, GraphStore, NodeData, NodeKind};
use crate::llm::LlmTransport;
use crate::persistence::{Checkpointer, OperationCheckpoint};
use crate::planner::{is_stall, PlanRequest, PlannerDriver};
use crate::reflector::{is_hard_veto, recovery_policy, ReflectRequest, ReflectorDriver, RecoveryPolicy};
use crate::broker::EventBroker;
use crate::tool_source::ToolSource;

/// Scheduler tunables (§10, Ambient Stack): read from environment variables
/// with code-level defaults, so a host can run the Core with zero
/// configuration present. Call [`crate::scheduler::SchedulerTunables::from_env`]
/// after `weft_config::load_and_apply("weft", None)` to pick up XDG/`.env`
/// overrides merged into the process environment.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerTunables {
    pub max_parallel: usize,
    /// Operation-level P-E-R iteration budget.
    pub step_budget: u32,
    pub abort_grace_period: Duration,
    /// How many times an L0/L1 failure auto-retries before escalating.
    pub max_auto_retries: u32,
    pub event_queue_capacity: usize,
    pub replay_retention: usize,
    /// Consecutive distinct-task `inconclusive` reflections before re-planning.
    pub inconclusive_replan_threshold: u32,
}

impl Default for SchedulerTunables {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            step_budget: 200,
            abort_grace_period: Duration::from_secs(10),
            max_auto_retries: 2,
            event_queue_capacity: 256,
            replay_retention: 1024,
            inconclusive_replan_threshold: 3,
        }
    }
}

impl SchedulerTunables {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_parallel: env_usize("WEFT_MAX_PARALLEL", defaults.max_parallel),
            step_budget: env_u32("WEFT_STEP_BUDGET", defaults.step_budget),
            abort_grace_period: Duration::from_secs(env_u64(
                "WEFT_ABORT_GRACE_SECS",
                defaults.abort_grace_period.as_secs(),
            )),
            max_auto_retries: env_u32("WEFT_MAX_AUTO_RETRIES", defaults.max_auto_retries),
            event_queue_capacity: env_usize(
                "WEFT_EVENT_QUEUE_CAPACITY",
                defaults.event_queue_capacity,
            ),
            replay_retention: env_usize("WEFT_REPLAY_RETENTION", defaults.replay_retention),
            inconclusive_replan_threshold: env_u32(
                "WEFT_INCONCLUSIVE_REPLAN_THRESHOLD",
                defaults.inconclusive_replan_threshold,
            ),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Terminal status of one operation (§4.9, "Termination conditions").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Completed,
    Aborted,
    Stalled,
    Failed,
}

#[derive(Clone, Debug)]
pub struct OperationOutcome {
    pub status: OperationStatus,
    pub reason: String,
}

struct TaskRecord {
    reflected: bool,
    auto_retries: u32,
}

/// One operation's P-E-R control flow. Owns the Graph Store, Broker, and Gate;
/// drives the Planner/Reflector inline and fans Executor workers out via
/// [`FuturesUnordered`] up to `tunables.max_parallel`.
pub struct Scheduler<T: LlmTransport + Send + Sync + 'static, S: ToolSource + Send + Sync + 'static> {
    op_id: String,
    goal: String,
    graph: GraphStore,
    broker: EventBroker,
    gate: InterventionGate,
    planner: PlannerDriver<T>,
    executor: Arc<ExecutorDriver<T, S>>,
    reflector: ReflectorDriver<T>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    cancel: CancellationToken,
    tunables: SchedulerTunables,
    tasks: HashMap<String, TaskRecord>,
}

impl<T: LlmTransport + Send + Sync + 'static, S: ToolSource + Send + Sync + 'static> Scheduler<T, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        op_id: impl Into<String>,
        goal: impl Into<String>,
        planner: PlannerDriver<T>,
        executor: ExecutorDriver<T, S>,
        reflector: ReflectorDriver<T>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
        cancel: CancellationToken,
        tunables: SchedulerTunables,
    ) -> Self {
        let goal = goal.into();
        Self {
            op_id: op_id.into(),
            graph: GraphStore::new(goal.clone()),
            goal,
            broker: EventBroker::new(tunables.event_queue_capacity, tunables.replay_retention),
            gate: InterventionGate::new(true),
            planner,
            executor: Arc::new(executor),
            reflector,
            checkpointer,
            cancel,
            tunables,
            tasks: HashMap::new(),
        }
    }

    /// Disables HITL entirely: every Intervention Gate submission auto-approves.
    pub fn without_hitl(mut self) -> Self {
        self.gate = InterventionGate::new(false);
        self
    }

    pub fn broker(&self) -> &EventBroker {
        &self.broker
    }

    pub fn gate(&self) -> &InterventionGate {
        &self.gate
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the full P-E-R loop to a terminal [`OperationOutcome`].
    pub async fn run(mut self) -> Result<OperationOutcome, CoreError> {
        let span = info_span!("operation", operation_id = %self.op_id);
        async move {
            let available_tools = self.executor.list_tools().await.unwrap_or_default();
            let mut recent_failures: Vec<String> = Vec::new();
            let mut inconclusive_tasks: HashSet<String> = HashSet::new();
            let mut in_flight: FuturesUnordered<JoinHandle<ExecutorOutcome>> = FuturesUnordered::new();
            let mut iterations: u32 = 0;
            let mut first_plan = true;

            'planning: loop {
                if self.cancel.is_cancelled() {
                    return Ok(self.finalize(OperationStatus::Aborted, "cancelled").await);
                }
                iterations += 1;
                if iterations > self.tunables.step_budget {
                    return Ok(self
                        .finalize(OperationStatus::Stalled, "operation step budget exhausted")
                        .await);
                }

                self.broker.publish(None, EventBody::PhaseChanged { phase: Phase::Planning });
                let graph_summary = if first_plan { None } else { Some(self.render_graph_summary()?) };
                first_plan = false;

                let request = PlanRequest {
                    goal: self.goal.clone(),
                    graph_summary,
                    recent_failures: recent_failures.clone(),
                    guidance: None,
                };
                self.broker.publish(Some(Role::Planner), EventBody::LlmRequest {
                    prompt_chars: request.goal.len(),
                });
                let reply = self.planner.plan(&request).await?;
                self.broker.publish(Some(Role::Planner), EventBody::LlmResponse { ok: true, retried: 0 });

                if is_stall(&reply) {
                    return Ok(self
                        .finalize(OperationStatus::Stalled, "planner stall: empty batch, goal not achieved")
                        .await);
                }

                let req_id = format!("{}-plan-{iterations}", self.op_id);
                let batch_value = serde_json::to_value(&reply.graph_operations).unwrap_or(Value::Null);
                self.broker.publish(None, EventBody::InterventionRequired {
                    req_id: req_id.clone(),
                    batch: batch_value.clone(),
                });
                let receiver = self.gate.register(req_id.clone(), batch_value);
                self.checkpoint("running").await;
                let decision = match receiver {
                    Some(receiver) => InterventionGate::wait(receiver).await,
                    None => Decision::Approve,
                };
                self.broker.publish(None, EventBody::InterventionResolved {
                    req_id,
                    action: decision.action(),
                });
                self.checkpoint("running").await;

                let commands: Vec<GraphCommand> = match decision {
                    Decision::Approve => reply.graph_operations.clone(),
                    Decision::Modify(value) => match serde_json::from_value(value) {
                        Ok(commands) => commands,
                        Err(err) => {
                            recent_failures.push(format!("modified batch failed to parse: {err}"));
                            continue 'planning;
                        }
                    },
                    Decision::Reject(reason) => {
                        recent_failures.push(format!("batch rejected by reviewer: {reason}"));
                        continue 'planning;
                    }
                };

                if !commands.is_empty() {
                    let outcome = self.graph.apply(&commands)?;
                    let batch_id = format!("{}-batch-{iterations}", self.op_id);
                    if outcome.ok {
                        self.broker.publish(None, EventBody::GraphChanged {
                            batch_id,
                            node_ids: outcome.committed_node_ids,
                            edge_count: outcome.committed_edge_count,
                        });
                        self.checkpoint("running").await;
                    } else {
                        let first = outcome.rejected.first().cloned();
                        if let Some(rejected) = first {
                            self.broker.publish(None, EventBody::GraphRejected {
                                batch_id,
                                reason: rejected.reason,
                                detail: rejected.detail.clone(),
                            });
                            recent_failures.push(format!("graph batch rejected: {}", rejected.detail));
                        }
                        continue 'planning;
                    }
                }

                if reply.goal_achieved {
                    return Ok(self.finalize(OperationStatus::Completed, "planner declared goal achieved").await);
                }

                'dispatch: loop {
                    if self.cancel.is_cancelled() {
                        self.drain_cancelled(&mut in_flight).await;
                        return Ok(self.finalize(OperationStatus::Aborted, "cancelled").await);
                    }

                    let ready = self.graph.ready_tasks()?;
                    let slots = self.tunables.max_parallel.saturating_sub(in_flight.len());
                    if !ready.is_empty() && slots > 0 {
                        self.broker.publish(None, EventBody::PhaseChanged { phase: Phase::Executing });
                    }
                    for task_id in ready.into_iter().take(slots) {
                        self.graph.apply(&[crate::graph::GraphCommand::UpdateNode {
                            id: task_id.clone(),
                            updates: serde_json::json!({"status": "in_progress"}),
                        }])?;
                        let Some(task) = self.graph.get_task(&task_id)? else {
                            continue;
                        };
                        let causal_context = self.render_causal_context(&task_id)?;
                        let ctx = SubtaskContext {
                            task_id: task_id.clone(),
                            description: task.description.clone(),
                            completion_criteria: task.completion_criteria.clone(),
                            causal_context,
                            available_tools: available_tools.clone(),
                        };
                        let executor = self.executor.clone();
                        let cancel = self.cancel.clone();
                        let handle = tokio::spawn(async move {
                            executor
                                .run_subtask(&ctx, &cancel)
                                .await
                                .unwrap_or_else(|err| ExecutorOutcome {
                                    task_id: ctx.task_id.clone(),
                                    stop_reason: StopReason::StepBudgetExceeded,
                                    status: crate::graph::TaskStatus::Failed,
                                    failure_level: Some(crate::graph::FailureLevel::L1),
                                    steps: vec![],
                                    transcript: vec![],
                                    staged_causal_nodes: vec![],
                                    summary: Some(format!("executor error: {err}")),
                                })
                        });
                        in_flight.push(handle);
                    }

                    if in_flight.is_empty() {
                        break 'dispatch;
                    }

                    let outcome = match in_flight.next().await.expect("in_flight is non-empty") {
                        Ok(outcome) => outcome,
                        Err(join_err) => {
                            warn!(error = %join_err, "executor worker task panicked or was cancelled");
                            continue 'dispatch;
                        }
                    };
                    self.record_executor_steps(&outcome)?;

                    let replan_scope = self.reflect(&outcome, &mut recent_failures, &mut inconclusive_tasks).await?;
                    match replan_scope {
                        Some(ReplanTrigger::Replan) => break 'dispatch,
                        Some(ReplanTrigger::Terminate(status, reason)) => {
                            self.drain_cancelled(&mut in_flight).await;
                            return Ok(self.finalize(status, reason).await);
                        }
                        None => continue 'dispatch,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn reflect(
        &mut self,
        outcome: &ExecutorOutcome,
        recent_failures: &mut Vec<String>,
        inconclusive_tasks: &mut HashSet<String>,
    ) -> Result<Option<ReplanTrigger>, CoreError> {
        let task_id = outcome.task_id.clone();

        if self.tasks.get(&task_id).map(|r| r.reflected).unwrap_or(false) {
            debug!(task_id = %task_id, "task already reflected, skipping (P6)");
            return Ok(None);
        }

        self.broker.publish(None, EventBody::PhaseChanged { phase: Phase::Reflecting });
        let transcript = outcome
            .transcript
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let staged_summary = outcome
            .staged_causal_nodes
            .iter()
            .map(|n| format!("{:?}: {}", n.variant, n.fields.description))
            .collect::<Vec<_>>()
            .join("\n");
        let request = ReflectRequest {
            task_id: task_id.clone(),
            subtask_description: task_id.clone(),
            terminal_status: format!("{:?}", outcome.status),
            transcript,
            staged_causal_nodes_summary: staged_summary,
        };
        let reply = self.reflector.reflect(&request).await?;

        self.tasks.entry(task_id.clone()).or_insert(TaskRecord {
            reflected: false,
            auto_retries: 0,
        });
        self.tasks.get_mut(&task_id).unwrap().reflected = true;

        let mut committed_confirmed_vulnerability = false;
        if !reply.causal_graph_updates.is_empty() {
            for command in &reply.causal_graph_updates {
                if let crate::graph::GraphCommand::AddCausalNode { variant, .. } = command {
                    if *variant == crate::graph::CausalKind::ConfirmedVulnerability {
                        committed_confirmed_vulnerability = true;
                    }
                }
            }
            let apply_outcome = self.graph.apply(&reply.causal_graph_updates)?;
            if apply_outcome.ok {
                self.broker.publish(None, EventBody::GraphChanged {
                    batch_id: format!("{task_id}-causal"),
                    node_ids: apply_outcome.committed_node_ids,
                    edge_count: apply_outcome.committed_edge_count,
                });
            }
        }

        let status_update = match outcome.status {
            crate::graph::TaskStatus::Completed => "completed",
            crate::graph::TaskStatus::Failed => "failed",
            crate::graph::TaskStatus::Aborted => "aborted",
            crate::graph::TaskStatus::Stalled => "stalled",
            _ => "failed",
        };
        let _ = self.graph.apply(&[crate::graph::GraphCommand::UpdateNode {
            id: task_id.clone(),
            updates: serde_json::json!({"status": status_update}),
        }]);
        self.checkpoint("running").await;

        if is_hard_veto(&reply, committed_confirmed_vulnerability) {
            return Ok(Some(ReplanTrigger::Terminate(
                OperationStatus::Completed,
                "hard veto: confirmed vulnerability committed with mission accomplished".into(),
            )));
        }
        if reply.global_mission_accomplished {
            return Ok(Some(ReplanTrigger::Terminate(
                OperationStatus::Completed,
                "reflector confirmed mission accomplished".into(),
            )));
        }

        use crate::reflector::AuditStatus;
        match reply.audit_result.status {
            AuditStatus::Passed => {
                inconclusive_tasks.remove(&task_id);
            }
            AuditStatus::Inconclusive => {
                inconclusive_tasks.insert(task_id.clone());
                if inconclusive_tasks.len() as u32 >= self.tunables.inconclusive_replan_threshold {
                    inconclusive_tasks.clear();
                    return Ok(Some(ReplanTrigger::Replan));
                }
            }
            AuditStatus::Failed => {
                inconclusive_tasks.remove(&task_id);
                if let Some(attribution) = &reply.failure_attribution {
                    recent_failures.push(format!(
                        "task {task_id} failed (level {:?}): {}",
                        attribution.level, attribution.rationale
                    ));
                    match recovery_policy(attribution.level) {
                        RecoveryPolicy::AutoRetry => {
                            let record = self.tasks.get_mut(&task_id).unwrap();
                            record.auto_retries += 1;
                            if record.auto_retries <= self.tunables.max_auto_retries {
                                record.reflected = false;
                                let _ = self.graph.apply(&[crate::graph::GraphCommand::UpdateNode {
                                    id: task_id.clone(),
                                    updates: serde_json::json!({"status": "pending"}),
                                }]);
                            }
                        }
                        RecoveryPolicy::ReplanParentTask | RecoveryPolicy::ReplanOperation => {
                            return Ok(Some(ReplanTrigger::Replan));
                        }
                        RecoveryPolicy::Abort => {
                            return Ok(Some(ReplanTrigger::Terminate(
                                OperationStatus::Failed,
                                format!("fatal failure on task {task_id}: {}", attribution.rationale),
                            )));
                        }
                    }
                }
            }
        }

        Ok(None)
    }

    fn record_executor_steps(&mut self, outcome: &ExecutorOutcome) -> Result<(), CoreError> {
        for step in &outcome.steps {
            let add = self.graph.apply(&[GraphCommand::AddNode {
                node_data: NodeData {
                    id: step.node_id.clone(),
                    kind: NodeKind::Action,
                    description: step.tool.clone(),
                    completion_criteria: None,
                    dependencies: vec![],
                    parent: Some(outcome.task_id.clone()),
                    tool_name: Some(step.tool.clone()),
                    tool_args: Some(step.params.clone()),
                },
            }]);
            if let Ok(outcome_add) = add {
                if outcome_add.ok {
                    let status = match step.status {
                        crate::graph::TaskStatus::Completed => "completed",
                        crate::graph::TaskStatus::Failed => "failed",
                        _ => "failed",
                    };
                    let _ = self.graph.apply(&[
                        GraphCommand::UpdateNode {
                            id: step.node_id.clone(),
                            updates: serde_json::json!({"status": "in_progress"}),
                        },
                        GraphCommand::UpdateNode {
                            id: step.node_id.clone(),
                            updates: serde_json::json!({
                                "status": status,
                                "result": step.result,
                                "observation": step.observation,
                            }),
                        },
                    ]);
                    self.broker.publish(None, EventBody::ExecutionStepCompleted {
                        task_id: outcome.task_id.clone(),
                        action_id: step.node_id.clone(),
                        status: status.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn drain_cancelled(&self, in_flight: &mut FuturesUnordered<JoinHandle<ExecutorOutcome>>) {
        let grace = tokio::time::timeout(self.tunables.abort_grace_period, async {
            while in_flight.next().await.is_some() {}
        });
        if grace.await.is_err() {
            warn!("abort grace period elapsed with executor workers still in flight");
        }
        self.gate.reject_all("operation aborted");
    }

    async fn finalize(&self, status: OperationStatus, reason: impl Into<String>) -> OperationOutcome {
        let reason = reason.into();
        match status {
            OperationStatus::Completed => {
                info!(reason = %reason, "operation completed");
                self.broker.publish(None, EventBody::MissionAccomplished);
            }
            OperationStatus::Aborted | OperationStatus::Failed => {
                warn!(reason = %reason, status = ?status, "operation ended without success");
                self.broker.publish(None, EventBody::OperationAborted { reason: reason.clone() });
            }
            OperationStatus::Stalled => {
                warn!(reason = %reason, "operation stalled");
                self.broker.publish(None, EventBody::OperationAborted { reason: reason.clone() });
            }
        }
        self.checkpoint(status_label(status)).await;
        OperationOutcome { status, reason }
    }

    async fn checkpoint(&self, status: &str) {
        let Some(checkpointer) = &self.checkpointer else {
            return;
        };
        let Ok(snapshot) = self.graph.snapshot() else {
            return;
        };
        let Ok(graph_value) = serde_json::to_value(&snapshot) else {
            return;
        };
        let event_tail: Vec<Value> = self
            .broker
            .retained_events()
            .iter()
            .filter_map(|e| e.to_value().ok())
            .collect();
        let checkpoint = OperationCheckpoint {
            op_id: self.op_id.clone(),
            status: status.to_string(),
            graph: graph_value,
            event_tail,
            pending_interventions: self.gate.pending_requests(),
            metadata: serde_json::json!({"goal": self.goal}),
        };
        if let Err(err) = checkpointer.put(checkpoint).await {
            warn!(error = %err, "failed to persist operation checkpoint");
        }
    }

    fn render_graph_summary(&self) -> Result<String, CoreError> {
        let snapshot = self.graph.snapshot()?;
        let tasks: Vec<String> = snapshot
            .task_nodes
            .iter()
            .map(|n| format!("- [{:?}] {} ({:?}): {}", n.kind, n.id, n.status, n.description))
            .collect();
        let causal_count = snapshot.causal_nodes.len();
        Ok(format!(
            "Tasks:\n{}\nCausal graph: {causal_count} node(s)",
            tasks.join("\n")
        ))
    }

    fn render_causal_context(&self, task_id: &str) -> Result<String, CoreError> {
        let snapshot = self.graph.snapshot()?;
        let mut related: HashSet<String> = self.graph.ancestors(task_id)?.into_iter().collect();
        related.extend(self.graph.descendants(task_id)?);
        related.insert(task_id.to_string());

        let action_ids: HashSet<String> = snapshot
            .task_nodes
            .iter()
            .filter(|n| n.parent.as_deref().map(|p| related.contains(p)).unwrap_or(false))
            .map(|n| n.id.clone())
            .collect();

        let lines: Vec<String> = snapshot
            .causal_nodes
            .iter()
            .filter(|n| {
                n.source_action_id
                    .as_ref()
                    .map(|source| action_ids.contains(source) || related.contains(source))
                    .unwrap_or(false)
            })
            .map(|n| format!("- [{:?}] {}", n.variant, n.description))
            .collect();

        if lines.is_empty() {
            Ok("(no causal context yet)".to_string())
        } else {
            Ok(lines.join("\n"))
        }
    }
}

enum ReplanTrigger {
    Replan,
    Terminate(OperationStatus, String),
}

fn status_label(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Completed => "completed",
        OperationStatus::Aborted => "aborted",
        OperationStatus::Stalled => "stalled",
        OperationStatus::Failed => "failed",
    }
}
