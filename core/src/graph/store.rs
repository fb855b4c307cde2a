//! `GraphStore` (§4.1): the dual-graph state, behind one reader-writer lock in
//! an arena keyed by stable string id (never by pointer), per the redesign
//! note in §11. Mutation is serialized and applied as an all-or-nothing batch;
//! readers only ever see a committed, consistent state.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use weft_event::RejectReason;

use crate::error::CoreError;

use super::causal::{CausalEdge, CausalKind, CausalNode};
use super::command::GraphCommand;
use super::node::{NodeKind, TaskNode, TaskStatus};
use super::snapshot::GraphSnapshot;

/// Local failure mode for store-level operations that are not expressed as a
/// `RejectReason` (those are expected, data-driven rejections; this is for
/// genuinely exceptional conditions).
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph store lock poisoned")]
    LockPoisoned,
}

impl From<GraphError> for CoreError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::LockPoisoned => CoreError::Fatal("graph store lock poisoned".into()),
        }
    }
}

/// One rejected command from a batch, with enough detail to render
/// `graph.rejected`.
#[derive(Clone, Debug)]
pub struct RejectedCommand {
    pub command_index: usize,
    pub reason: RejectReason,
    pub detail: String,
}

/// Result of `GraphStore::apply`. On any rejection the whole batch is rolled
/// back: `ok` is `false`, `rejected` lists every reason, and neither
/// `committed_node_ids` nor `committed_edge_count` reflect any change.
#[derive(Clone, Debug, Default)]
pub struct ApplyOutcome {
    pub ok: bool,
    pub rejected: Vec<RejectedCommand>,
    pub committed_node_ids: Vec<String>,
    pub committed_edge_count: usize,
}

#[derive(Clone, Default)]
struct Inner {
    tasks: HashMap<String, TaskNode>,
    task_edges: Vec<(String, String)>,
    causal_nodes: HashMap<String, CausalNode>,
    causal_edges: Vec<CausalEdge>,
}

pub struct GraphStore {
    inner: RwLock<Inner>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl GraphStore {
    /// Creates a store with a single `root` node holding `goal`, status
    /// `in_progress` (the root is never dispatched through `ready_tasks`, so
    /// it starts running as soon as the operation does).
    pub fn new(goal: impl Into<String>) -> Self {
        let mut tasks = HashMap::new();
        tasks.insert(
            "root".to_string(),
            TaskNode {
                id: "root".to_string(),
                kind: NodeKind::Root,
                description: goal.into(),
                completion_criteria: None,
                status: TaskStatus::InProgress,
                dependencies: vec![],
                parent: None,
                created_at: now_millis(),
                started_at: Some(now_millis()),
                completed_at: None,
                artifacts: vec![],
                failure_level: None,
                tool_name: None,
                tool_args: None,
                result: None,
                observation: None,
            },
        );
        Self {
            inner: RwLock::new(Inner {
                tasks,
                task_edges: vec![],
                causal_nodes: HashMap::new(),
                causal_edges: vec![],
            }),
        }
    }

    /// Applies one batch atomically (§3.3, §4.1). On any rejection, no
    /// command in the batch takes effect.
    pub fn apply(
        &self,
        commands: &[GraphCommand],
    ) -> Result<ApplyOutcome, GraphError> {
        let mut guard = self.inner.write().map_err(|_| GraphError::LockPoisoned)?;
        let mut scratch = guard.clone();
        let mut rejected = Vec::new();
        let mut touched_ids: Vec<String> = Vec::new();
        let mut edge_count = 0usize;
        let mut batch_causal_edge_confidence: HashMap<(String, String, String), f64> =
            HashMap::new();
        let mut newly_added_causal: HashSet<String> = HashSet::new();

        for (index, command) in commands.iter().enumerate() {
            match apply_one(
                &mut scratch,
                command,
                &mut batch_causal_edge_confidence,
                &mut newly_added_causal,
            ) {
                Ok(Effect { node_ids, edges }) => {
                    touched_ids.extend(node_ids);
                    edge_count += edges;
                }
                Err((reason, detail)) => rejected.push(RejectedCommand {
                    command_index: index,
                    reason,
                    detail,
                }),
            }
        }

        if rejected.is_empty() {
            if let Err((index, reason, detail)) =
                check_causal_promotion_invariants(&scratch, &newly_added_causal)
            {
                rejected.push(RejectedCommand {
                    command_index: index,
                    reason,
                    detail,
                });
            }
        }

        if !rejected.is_empty() {
            return Ok(ApplyOutcome {
                ok: false,
                rejected,
                committed_node_ids: vec![],
                committed_edge_count: 0,
            });
        }

        *guard = scratch;
        Ok(ApplyOutcome {
            ok: true,
            rejected: vec![],
            committed_node_ids: touched_ids,
            committed_edge_count: edge_count,
        })
    }

    /// Immutable deep-cloned view of both graphs (§9). Never aliases live storage.
    pub fn snapshot(&self) -> Result<GraphSnapshot, GraphError> {
        let guard = self.inner.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut task_nodes: Vec<TaskNode> = guard.tasks.values().cloned().collect();
        task_nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut causal_nodes: Vec<CausalNode> = guard.causal_nodes.values().cloned().collect();
        causal_nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(GraphSnapshot {
            task_nodes,
            task_edges: guard.task_edges.clone(),
            causal_nodes,
            causal_edges: guard.causal_edges.clone(),
        })
    }

    /// Task ids satisfying I3, in topological order (ties broken by `created_at`).
    pub fn ready_tasks(&self) -> Result<Vec<String>, GraphError> {
        let guard = self.inner.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut ready: Vec<&TaskNode> = guard
            .tasks
            .values()
            .filter(|n| n.kind == NodeKind::Task)
            .filter(|n| {
                let dep_statuses: Vec<TaskStatus> = n
                    .dependencies
                    .iter()
                    .filter_map(|d| guard.tasks.get(d))
                    .map(|d| d.status)
                    .collect();
                n.is_ready(&dep_statuses)
            })
            .collect();
        ready.sort_by_key(|n| (n.created_at, n.id.clone()));
        Ok(ready.into_iter().map(|n| n.id.clone()).collect())
    }

    /// Direct predecessor and successor task ids of `id` in the task DAG.
    pub fn neighbors(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let guard = self.inner.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut out: Vec<String> = guard
            .task_edges
            .iter()
            .filter_map(|(s, t)| {
                if s == id {
                    Some(t.clone())
                } else if t == id {
                    Some(s.clone())
                } else {
                    None
                }
            })
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Transitive dependencies of `id` (all ancestors in the dependency DAG).
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let guard = self.inner.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(cur) = stack.pop() {
            for (source, target) in &guard.task_edges {
                if target == &cur && seen.insert(source.clone()) {
                    stack.push(source.clone());
                }
            }
        }
        let mut out: Vec<String> = seen.into_iter().collect();
        out.sort();
        Ok(out)
    }

    /// Transitive dependents of `id` (all descendants in the dependency DAG).
    pub fn descendants(&self, id: &str) -> Result<Vec<String>, GraphError> {
        let guard = self.inner.read().map_err(|_| GraphError::LockPoisoned)?;
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(cur) = stack.pop() {
            for (source, target) in &guard.task_edges {
                if source == &cur && seen.insert(target.clone()) {
                    stack.push(target.clone());
                }
            }
        }
        let mut out: Vec<String> = seen.into_iter().collect();
        out.sort();
        Ok(out)
    }

    /// Looks up one task node by id (used by drivers building prompt context).
    pub fn get_task(&self, id: &str) -> Result<Option<TaskNode>, GraphError> {
        let guard = self.inner.read().map_err(|_| GraphError::LockPoisoned)?;
        Ok(guard.tasks.get(id).cloned())
    }
}

struct Effect {
    node_ids: Vec<String>,
    edges: usize,
}

fn apply_one(
    scratch: &mut Inner,
    command: &GraphCommand,
    batch_causal_edge_confidence: &mut HashMap<(String, String, String), f64>,
    newly_added_causal: &mut HashSet<String>,
) -> Result<Effect, (RejectReason, String)> {
    match command {
        GraphCommand::AddNode { node_data } => {
            if node_data.id.is_empty() {
                return Err((
                    RejectReason::InvariantViolation,
                    "node id must be non-empty".into(),
                ));
            }
            if scratch.tasks.contains_key(&node_data.id) {
                return Err((
                    RejectReason::DuplicateId,
                    format!("task id already exists: {}", node_data.id),
                ));
            }
            for dep in &node_data.dependencies {
                if !scratch.tasks.contains_key(dep) {
                    return Err((
                        RejectReason::UnknownId,
                        format!("unknown dependency id: {dep}"),
                    ));
                }
            }
            if let Some(parent) = &node_data.parent {
                if !scratch.tasks.contains_key(parent) {
                    return Err((
                        RejectReason::UnknownId,
                        format!("unknown parent id: {parent}"),
                    ));
                }
            }
            let candidate_edges: Vec<(String, String)> = node_data
                .dependencies
                .iter()
                .map(|dep| (dep.clone(), node_data.id.clone()))
                .collect();
            let mut all_edges = scratch.task_edges.clone();
            all_edges.extend(candidate_edges.iter().cloned());
            if has_cycle(&all_edges) {
                return Err((
                    RejectReason::Cycle,
                    format!("adding {} would close a dependency cycle", node_data.id),
                ));
            }
            let now = now_millis();
            scratch.tasks.insert(
                node_data.id.clone(),
                TaskNode {
                    id: node_data.id.clone(),
                    kind: node_data.kind,
                    description: node_data.description.clone(),
                    completion_criteria: node_data.completion_criteria.clone(),
                    status: TaskStatus::Pending,
                    dependencies: node_data.dependencies.clone(),
                    parent: node_data.parent.clone(),
                    created_at: now,
                    started_at: None,
                    completed_at: None,
                    artifacts: vec![],
                    failure_level: None,
                    tool_name: node_data.tool_name.clone(),
                    tool_args: node_data.tool_args.clone(),
                    result: None,
                    observation: None,
                },
            );
            let edge_count = candidate_edges.len();
            scratch.task_edges.extend(candidate_edges);
            Ok(Effect {
                node_ids: vec![node_data.id.clone()],
                edges: edge_count,
            })
        }

        GraphCommand::UpdateNode { id, updates } => {
            if let Some(task) = scratch.tasks.get(id).cloned() {
                let updated = apply_task_update(task, updates)?;
                scratch.tasks.insert(id.clone(), updated);
                Ok(Effect {
                    node_ids: vec![id.clone()],
                    edges: 0,
                })
            } else if let Some(causal) = scratch.causal_nodes.get(id).cloned() {
                let updated = apply_causal_update(causal, updates)?;
                scratch.causal_nodes.insert(id.clone(), updated);
                Ok(Effect {
                    node_ids: vec![id.clone()],
                    edges: 0,
                })
            } else {
                Err((RejectReason::UnknownId, format!("unknown node id: {id}")))
            }
        }

        GraphCommand::AddEdge {
            source,
            target,
            relation,
            confidence,
        } => {
            if !scratch.tasks.contains_key(source) {
                return Err((
                    RejectReason::UnknownId,
                    format!("unknown edge source: {source}"),
                ));
            }
            if !scratch.tasks.contains_key(target) {
                return Err((
                    RejectReason::UnknownId,
                    format!("unknown edge target: {target}"),
                ));
            }
            let mut all_edges = scratch.task_edges.clone();
            all_edges.push((source.clone(), target.clone()));
            if has_cycle(&all_edges) {
                return Err((
                    RejectReason::Cycle,
                    format!("edge {source} -> {target} would close a cycle"),
                ));
            }
            let _ = relation;
            let _ = confidence;
            if let Some(t) = scratch.tasks.get_mut(target) {
                if !t.dependencies.contains(source) {
                    t.dependencies.push(source.clone());
                }
            }
            scratch.task_edges.push((source.clone(), target.clone()));
            Ok(Effect {
                node_ids: vec![source.clone(), target.clone()],
                edges: 1,
            })
        }

        GraphCommand::DeprecateNode { id, reason } => {
            let _ = reason;
            if let Some(task) = scratch.tasks.get_mut(id) {
                if task.status == TaskStatus::Deprecated {
                    return Ok(Effect {
                        node_ids: vec![id.clone()],
                        edges: 0,
                    });
                }
                if task.status.is_terminal() {
                    return Err((
                        RejectReason::TerminalViolation,
                        format!("cannot deprecate terminal task: {id}"),
                    ));
                }
                task.status = TaskStatus::Deprecated;
                task.completed_at = Some(now_millis());
                return Ok(Effect {
                    node_ids: vec![id.clone()],
                    edges: 0,
                });
            }
            if let Some(causal) = scratch.causal_nodes.get_mut(id) {
                causal.deprecated = true;
                return Ok(Effect {
                    node_ids: vec![id.clone()],
                    edges: 0,
                });
            }
            Err((RejectReason::UnknownId, format!("unknown node id: {id}")))
        }

        GraphCommand::AddCausalNode { variant, fields } => {
            if fields.id.is_empty() {
                return Err((
                    RejectReason::InvariantViolation,
                    "causal node id must be non-empty".into(),
                ));
            }
            if scratch.causal_nodes.contains_key(&fields.id) {
                return Err((
                    RejectReason::DuplicateId,
                    format!("causal id already exists: {}", fields.id),
                ));
            }
            scratch.causal_nodes.insert(
                fields.id.clone(),
                CausalNode {
                    id: fields.id.clone(),
                    variant: *variant,
                    description: fields.description.clone(),
                    confidence: fields.confidence,
                    source_action_id: fields.source_action_id.clone(),
                    deprecated: false,
                    created_at: now_millis(),
                },
            );
            newly_added_causal.insert(fields.id.clone());
            Ok(Effect {
                node_ids: vec![fields.id.clone()],
                edges: 0,
            })
        }

        GraphCommand::AddCausalEdge {
            source,
            target,
            relation,
            confidence,
        } => {
            if !scratch.causal_nodes.contains_key(source) {
                return Err((
                    RejectReason::UnknownId,
                    format!("unknown causal edge source: {source}"),
                ));
            }
            if !scratch.causal_nodes.contains_key(target) {
                return Err((
                    RejectReason::UnknownId,
                    format!("unknown causal edge target: {target}"),
                ));
            }
            if !(0.0..=1.0).contains(confidence) {
                return Err((
                    RejectReason::InvariantViolation,
                    format!("confidence out of [0,1]: {confidence}"),
                ));
            }
            let key = (source.clone(), target.clone(), relation.clone());
            if let Some(prev) = batch_causal_edge_confidence.get(&key) {
                if *confidence < *prev {
                    return Err((
                        RejectReason::InvariantViolation,
                        format!(
                            "edge confidence must be monotonically non-decreasing within a commit: {prev} -> {confidence}"
                        ),
                    ));
                }
            }
            batch_causal_edge_confidence.insert(key, *confidence);
            scratch.causal_edges.push(CausalEdge {
                source: source.clone(),
                target: target.clone(),
                relation: relation.clone(),
                confidence: *confidence,
            });
            Ok(Effect {
                node_ids: vec![source.clone(), target.clone()],
                edges: 1,
            })
        }
    }
}

fn apply_task_update(
    mut task: TaskNode,
    updates: &serde_json::Value,
) -> Result<TaskNode, (RejectReason, String)> {
    let Some(obj) = updates.as_object() else {
        return Err((
            RejectReason::InvariantViolation,
            "updates must be a JSON object".into(),
        ));
    };
    if let Some(status_val) = obj.get("status") {
        let next: TaskStatus = serde_json::from_value(status_val.clone()).map_err(|e| {
            (
                RejectReason::InvariantViolation,
                format!("invalid status value: {e}"),
            )
        })?;
        if !task.status.can_transition_to(next) {
            return Err((
                RejectReason::TerminalViolation,
                format!("cannot transition {:?} -> {:?}", task.status, next),
            ));
        }
        task.status = next;
        match next {
            TaskStatus::InProgress => task.started_at = Some(now_millis()),
            s if s.is_terminal() => task.completed_at = Some(now_millis()),
            _ => {}
        }
    }
    if let Some(v) = obj.get("description").and_then(|v| v.as_str()) {
        task.description = v.to_string();
    }
    if let Some(v) = obj.get("completion_criteria").and_then(|v| v.as_str()) {
        task.completion_criteria = Some(v.to_string());
    }
    if let Some(v) = obj.get("failure_level") {
        task.failure_level = Some(serde_json::from_value(v.clone()).map_err(|e| {
            (
                RejectReason::InvariantViolation,
                format!("invalid failure_level: {e}"),
            )
        })?);
    }
    if let Some(v) = obj.get("artifacts").and_then(|v| v.as_array()) {
        task.artifacts.extend(v.iter().cloned());
    }
    if let Some(v) = obj.get("result") {
        task.result = Some(v.clone());
    }
    if let Some(v) = obj.get("observation").and_then(|v| v.as_str()) {
        task.observation = Some(v.to_string());
    }
    Ok(task)
}

fn apply_causal_update(
    mut node: CausalNode,
    updates: &serde_json::Value,
) -> Result<CausalNode, (RejectReason, String)> {
    let Some(obj) = updates.as_object() else {
        return Err((
            RejectReason::InvariantViolation,
            "updates must be a JSON object".into(),
        ));
    };
    if let Some(v) = obj.get("description").and_then(|v| v.as_str()) {
        node.description = v.to_string();
    }
    if let Some(v) = obj.get("confidence").and_then(|v| v.as_f64()) {
        node.confidence = Some(v);
    }
    if let Some(v) = obj.get("source_action_id").and_then(|v| v.as_str()) {
        node.source_action_id = Some(v.to_string());
    }
    Ok(node)
}

/// Post-batch check for C1/C2: a Vulnerability needs an inbound `supports`
/// edge from an Evidence/KeyFact node; a ConfirmedVulnerability needs an
/// inbound `validates` edge from an Evidence node carrying a
/// `source_action_id`. Only nodes touched by this batch are checked, so
/// already-committed data from earlier batches is never retroactively
/// invalidated.
fn check_causal_promotion_invariants(
    scratch: &Inner,
    newly_added: &HashSet<String>,
) -> Result<(), (usize, RejectReason, String)> {
    for id in newly_added {
        let Some(node) = scratch.causal_nodes.get(id) else {
            continue;
        };
        match node.variant {
            CausalKind::Vulnerability => {
                let has_support = scratch.causal_edges.iter().any(|e| {
                    e.target == *id
                        && e.relation == super::causal::RELATION_SUPPORTS
                        && scratch
                            .causal_nodes
                            .get(&e.source)
                            .map(|s| {
                                matches!(s.variant, CausalKind::Evidence | CausalKind::KeyFact)
                            })
                            .unwrap_or(false)
                });
                if !has_support {
                    return Err((
                        0,
                        RejectReason::InvariantViolation,
                        format!(
                            "vulnerability {id} needs an inbound supporting edge from evidence/key-fact (C1)"
                        ),
                    ));
                }
            }
            CausalKind::ConfirmedVulnerability => {
                let has_validation = scratch.causal_edges.iter().any(|e| {
                    e.target == *id
                        && e.relation == super::causal::RELATION_VALIDATES
                        && scratch
                            .causal_nodes
                            .get(&e.source)
                            .map(|s| {
                                s.variant == CausalKind::Evidence
                                    && s.source_action_id.is_some()
                            })
                            .unwrap_or(false)
                });
                if !has_validation {
                    return Err((
                        0,
                        RejectReason::InvariantViolation,
                        format!(
                            "confirmed vulnerability {id} needs an inbound validates edge from an evidence node with a source action (C2)"
                        ),
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Whether `edges` (a `(source, target)` list meaning "source before target")
/// contains a cycle, via DFS with a recursion stack.
fn has_cycle(edges: &[(String, String)]) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (s, t) in edges {
        adjacency.entry(s.as_str()).or_default().push(t.as_str());
    }
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
    ) -> bool {
        if on_stack.contains(node) {
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visited.insert(node);
        on_stack.insert(node);
        if let Some(next) = adjacency.get(node) {
            for n in next {
                if visit(n, adjacency, visited, on_stack) {
                    return true;
                }
            }
        }
        on_stack.remove(node);
        false
    }

    let nodes: HashSet<&str> = adjacency
        .keys()
        .copied()
        .chain(edges.iter().map(|(_, t)| t.as_str()))
        .collect();
    for node in nodes {
        if visit(node, &adjacency, &mut visited, &mut on_stack) {
            return true;
        }
    }
    false
}
