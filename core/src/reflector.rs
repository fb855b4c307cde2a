//! Reflector Driver (§4.7): audits the outcome of one subtask, attributes
//! failures to a retry policy, and proposes causal graph commits.
//!
//! Same shape as [`crate::planner::PlannerDriver`]: no Graph Store or Broker
//! dependency. The Scheduler renders the [`ReflectRequest`] from an
//! [`crate::executor::ExecutorOutcome`], calls [`ReflectorDriver::reflect`],
//! then applies `causal_graph_updates` and records the exactly-once (P6) and
//! hard-veto (§4.7) bookkeeping itself.

use serde::Deserialize;

use weft_event::Role;

use crate::error::CoreError;
use crate::graph::{FailureLevel, GraphCommand};
use crate::llm::{LlmClient, LlmTransport};

/// Everything the Reflector prompt needs for one subtask audit, already rendered.
#[derive(Clone, Debug)]
pub struct ReflectRequest {
    pub task_id: String,
    pub subtask_description: String,
    pub terminal_status: String,
    /// Bounded execution transcript handed off by the Executor.
    pub transcript: String,
    pub staged_causal_nodes_summary: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuditResult {
    pub status: AuditStatus,
    pub completion_check: String,
    #[serde(default)]
    pub logic_issues: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Passed,
    Failed,
    Inconclusive,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FailureAttribution {
    pub level: FailureLevel,
    pub rationale: String,
}

/// The Reflector's expected reply shape.
#[derive(Clone, Debug, Deserialize)]
pub struct ReflectReply {
    pub audit_result: AuditResult,
    #[serde(default)]
    pub causal_graph_updates: Vec<GraphCommand>,
    #[serde(default)]
    pub failure_attribution: Option<FailureAttribution>,
    pub global_mission_accomplished: bool,
    #[serde(default)]
    pub attack_intelligence: Option<String>,
}

/// Recovery policy attached to a [`FailureLevel`] (§4.7's table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// L0/L1: retried automatically by the Scheduler up to a configured bound.
    AutoRetry,
    /// L2: re-plan at the parent task.
    ReplanParentTask,
    /// L3/L4: re-plan at the operation level.
    ReplanOperation,
    /// L5: abort the operation.
    Abort,
}

pub fn recovery_policy(level: FailureLevel) -> RecoveryPolicy {
    match level {
        FailureLevel::L0 | FailureLevel::L1 => RecoveryPolicy::AutoRetry,
        FailureLevel::L2 => RecoveryPolicy::ReplanParentTask,
        FailureLevel::L3 | FailureLevel::L4 => RecoveryPolicy::ReplanOperation,
        FailureLevel::L5 => RecoveryPolicy::Abort,
    }
}

/// Hard veto (§4.7): once true, the Scheduler finalizes regardless of any
/// still-ready tasks. `committed_confirmed_vulnerability` is the Scheduler's
/// own observation of whether this reply's `causal_graph_updates` added a
/// `ConfirmedVulnerability` node — the Reflector driver does not inspect its
/// own commands for this, the caller does after applying them.
pub fn is_hard_veto(reply: &ReflectReply, committed_confirmed_vulnerability: bool) -> bool {
    reply.global_mission_accomplished && committed_confirmed_vulnerability
}

pub struct ReflectorDriver<T: LlmTransport> {
    client: LlmClient<T>,
}

impl<T: LlmTransport> ReflectorDriver<T> {
    pub fn new(client: LlmClient<T>) -> Self {
        Self { client }
    }

    pub async fn reflect(&self, request: &ReflectRequest) -> Result<ReflectReply, CoreError> {
        let prompt = self.build_prompt(request);
        self.client.ask(Role::Reflector, &prompt).await
    }

    fn build_prompt(&self, request: &ReflectRequest) -> String {
        format!(
            "Subtask: {}\nTerminal status: {}\nTranscript:\n{}\nStaged causal nodes:\n{}\n\n\
             Reply with a JSON object: {{\"audit_result\": {{\"status\": \"passed|failed|inconclusive\", \
             \"completion_check\": string, \"logic_issues\": [string]}}, \"causal_graph_updates\": [...], \
             \"failure_attribution\": {{\"level\": \"L0\".. \"L5\", \"rationale\": string}}?, \
             \"global_mission_accomplished\": bool, \"attack_intelligence\": string?}}.",
            request.subtask_description,
            request.terminal_status,
            request.transcript,
            request.staged_causal_nodes_summary,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlm;

    fn request() -> ReflectRequest {
        ReflectRequest {
            task_id: "t1".into(),
            subtask_description: "probe /login".into(),
            terminal_status: "completed".into(),
            transcript: "tool http_get -> 200 OK".into(),
            staged_causal_nodes_summary: "(none)".into(),
        }
    }

    #[tokio::test]
    async fn passed_audit_with_no_failure_attribution() {
        let reflector = ReflectorDriver::new(LlmClient::new(StubLlm::single(
            r#"{"audit_result":{"status":"passed","completion_check":"criteria met","logic_issues":[]},"causal_graph_updates":[],"global_mission_accomplished":false}"#,
        )));
        let reply = reflector.reflect(&request()).await.unwrap();
        assert_eq!(reply.audit_result.status, AuditStatus::Passed);
        assert!(reply.failure_attribution.is_none());
    }

    #[tokio::test]
    async fn failed_audit_carries_failure_level() {
        let reflector = ReflectorDriver::new(LlmClient::new(StubLlm::single(
            r#"{"audit_result":{"status":"failed","completion_check":"no evidence","logic_issues":["assumed without checking"]},"causal_graph_updates":[],"failure_attribution":{"level":"L3","rationale":"hypothesis unsupported"},"global_mission_accomplished":false}"#,
        )));
        let reply = reflector.reflect(&request()).await.unwrap();
        let attribution = reply.failure_attribution.unwrap();
        assert_eq!(attribution.level, FailureLevel::L3);
        assert_eq!(recovery_policy(attribution.level), RecoveryPolicy::ReplanOperation);
    }

    #[test]
    fn recovery_policy_maps_every_level() {
        assert_eq!(recovery_policy(FailureLevel::L0), RecoveryPolicy::AutoRetry);
        assert_eq!(recovery_policy(FailureLevel::L1), RecoveryPolicy::AutoRetry);
        assert_eq!(recovery_policy(FailureLevel::L2), RecoveryPolicy::ReplanParentTask);
        assert_eq!(recovery_policy(FailureLevel::L4), RecoveryPolicy::ReplanOperation);
        assert_eq!(recovery_policy(FailureLevel::L5), RecoveryPolicy::Abort);
    }

    #[test]
    fn hard_veto_requires_both_conditions() {
        let reply = ReflectReply {
            audit_result: AuditResult {
                status: AuditStatus::Passed,
                completion_check: "ok".into(),
                logic_issues: vec![],
            },
            causal_graph_updates: vec![],
            failure_attribution: None,
            global_mission_accomplished: true,
            attack_intelligence: None,
        };
        assert!(is_hard_veto(&reply, true));
        assert!(!is_hard_veto(&reply, false));
    }
}
