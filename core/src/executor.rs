//! Executor Driver (§4.6): drives a single subtask to completion, one LLM
//! step at a time, invoking tools through the Tool Host Client and folding
//! its own transcript once it outgrows a byte budget.
//!
//! Like [`crate::planner::PlannerDriver`], this module does not touch the
//! Graph Store or Broker directly: [`ExecutorDriver::run_subtask`] returns a
//! structured [`ExecutorOutcome`] (including the per-step [`ExecutorStep`]
//! records) and the Scheduler is responsible for turning those into
//! `ADD_NODE`/`UPDATE_NODE` commands and `execution.step.completed` events.
//! Executor workers are stateless between subtasks (§4.6, "Parallelism"), so
//! nothing here survives across two calls to `run_subtask`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use weft_event::Role;

use crate::compress::{compress_if_needed, HistoryCompactionConfig, TranscriptEntry};
use crate::error::CoreError;
use crate::graph::{CausalKind, CausalNodeData, FailureLevel, TaskStatus};
use crate::llm::{LlmClient, LlmTransport};
use crate::tool_source::{ToolHostClient, ToolSource, ToolSpec};

/// Everything the Executor prompt needs for one subtask, already rendered.
#[derive(Clone, Debug)]
pub struct SubtaskContext {
    pub task_id: String,
    pub description: String,
    pub completion_criteria: Option<String>,
    /// Pruned slice of the causal graph relevant to this task's ancestors/descendants.
    pub causal_context: String,
    pub available_tools: Vec<ToolSpec>,
}

/// One proposed tool invocation from the Executor's reply.
#[derive(Clone, Debug, Deserialize)]
pub struct ExecutionOperation {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    pub node_id: String,
}

/// A causal node staged by the Executor for the Reflector to commit.
#[derive(Clone, Debug, Deserialize)]
pub struct StagedCausalNode {
    pub variant: CausalKind,
    #[serde(flatten)]
    pub fields: CausalNodeData,
}

#[derive(Clone, Debug, Deserialize)]
struct ExecutorStepReply {
    #[allow(dead_code)]
    thought: String,
    #[serde(default)]
    execution_operations: Vec<ExecutionOperation>,
    #[serde(default)]
    is_subtask_complete: bool,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    staged_causal_nodes: Vec<StagedCausalNode>,
}

const HALT_TOOL: &str = "halt_task";

/// One action the Executor carried out, for the Scheduler to record as an
/// `action` node on the task DAG.
#[derive(Clone, Debug)]
pub struct ExecutorStep {
    pub node_id: String,
    pub tool: String,
    pub params: Value,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub observation: String,
}

/// Why the subtask loop stopped (§4.6, "Termination conditions").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    SubtaskComplete,
    StepBudgetExceeded,
    RepeatedAction,
    Halted,
    Cancelled,
}

/// The handoff to the Reflector once a subtask loop ends.
#[derive(Clone, Debug)]
pub struct ExecutorOutcome {
    pub task_id: String,
    pub stop_reason: StopReason,
    pub status: TaskStatus,
    pub failure_level: Option<FailureLevel>,
    pub steps: Vec<ExecutorStep>,
    pub transcript: Vec<TranscriptEntry>,
    pub staged_causal_nodes: Vec<StagedCausalNode>,
    pub summary: Option<String>,
}

/// Tunables for one subtask run.
#[derive(Clone, Copy, Debug)]
pub struct ExecutorPolicy {
    pub step_budget: u32,
    /// Consecutive same-`(tool, normalized_args)` failures before the subtask
    /// is marked `failed` with `failure_level=L2` (§4.6).
    pub repeated_failure_threshold: u32,
    pub tool_call_deadline: Duration,
    pub history: HistoryCompactionConfig,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        Self {
            step_budget: 20,
            repeated_failure_threshold: 3,
            tool_call_deadline: Duration::from_secs(30),
            history: HistoryCompactionConfig::default(),
        }
    }
}

pub struct ExecutorDriver<T: LlmTransport, S: ToolSource> {
    llm: LlmClient<T>,
    tools: ToolHostClient<S>,
    policy: ExecutorPolicy,
}

impl<T: LlmTransport, S: ToolSource> ExecutorDriver<T, S> {
    pub fn new(llm: LlmClient<T>, tools: ToolHostClient<S>) -> Self {
        Self {
            llm,
            tools,
            policy: ExecutorPolicy::default(),
        }
    }

    pub fn with_policy(llm: LlmClient<T>, tools: ToolHostClient<S>, policy: ExecutorPolicy) -> Self {
        Self { llm, tools, policy }
    }

    /// Lists the tool host's available tools, for the Scheduler to attach to
    /// every [`SubtaskContext`] it builds.
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, CoreError> {
        Ok(self.tools.list_tools().await?)
    }

    /// Runs `ctx`'s subtask to one of the terminal stop reasons.
    pub async fn run_subtask(
        &self,
        ctx: &SubtaskContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutorOutcome, CoreError> {
        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let mut steps: Vec<ExecutorStep> = Vec::new();
        let mut consecutive_failures: HashMap<String, u32> = HashMap::new();

        for step_index in 0..self.policy.step_budget {
            if cancel.is_cancelled() {
                return Ok(self.finish(
                    ctx,
                    StopReason::Cancelled,
                    TaskStatus::Aborted,
                    None,
                    steps,
                    transcript,
                    vec![],
                    None,
                ));
            }

            let prompt = self.build_step_prompt(ctx, &transcript, step_index);
            let reply: ExecutorStepReply = self.llm.ask(Role::Executor, &prompt).await?;
            transcript.push(TranscriptEntry::verbatim(format!(
                "step {step_index}: {}",
                reply.thought
            )));

            if reply.is_subtask_complete {
                return Ok(self.finish(
                    ctx,
                    StopReason::SubtaskComplete,
                    TaskStatus::Completed,
                    None,
                    steps,
                    transcript,
                    reply.staged_causal_nodes,
                    reply.summary,
                ));
            }

            for op in &reply.execution_operations {
                if op.tool == HALT_TOOL {
                    return Ok(self.finish(
                        ctx,
                        StopReason::Halted,
                        TaskStatus::Aborted,
                        None,
                        steps,
                        transcript,
                        reply.staged_causal_nodes.clone(),
                        reply.summary.clone(),
                    ));
                }

                let key = normalize_action(&op.tool, &op.params);
                match self
                    .tools
                    .call_tool(&op.tool, op.params.clone(), self.policy.tool_call_deadline)
                    .await
                {
                    Ok(content) => {
                        consecutive_failures.remove(&key);
                        let observation = content.text.clone();
                        transcript.push(TranscriptEntry::verbatim(format!(
                            "tool {} -> {}",
                            op.tool, observation
                        )));
                        steps.push(ExecutorStep {
                            node_id: op.node_id.clone(),
                            tool: op.tool.clone(),
                            params: op.params.clone(),
                            status: TaskStatus::Completed,
                            result: Some(Value::String(content.text)),
                            observation,
                        });
                    }
                    Err(err) => {
                        let observation = err.to_string();
                        transcript.push(TranscriptEntry::verbatim(format!(
                            "tool {} failed -> {}",
                            op.tool, observation
                        )));
                        steps.push(ExecutorStep {
                            node_id: op.node_id.clone(),
                            tool: op.tool.clone(),
                            params: op.params.clone(),
                            status: TaskStatus::Failed,
                            result: None,
                            observation,
                        });

                        let failures = consecutive_failures.entry(key).or_insert(0);
                        *failures += 1;
                        if *failures >= self.policy.repeated_failure_threshold {
                            return Ok(self.finish(
                                ctx,
                                StopReason::RepeatedAction,
                                TaskStatus::Failed,
                                Some(FailureLevel::L2),
                                steps,
                                transcript,
                                reply.staged_causal_nodes.clone(),
                                reply.summary.clone(),
                            ));
                        }
                    }
                }
            }

            self.maybe_compress(&mut transcript).await?;
        }

        Ok(self.finish(
            ctx,
            StopReason::StepBudgetExceeded,
            TaskStatus::Stalled,
            None,
            steps,
            transcript,
            vec![],
            None,
        ))
    }

    async fn maybe_compress(&self, transcript: &mut Vec<TranscriptEntry>) -> Result<(), CoreError> {
        let llm = &self.llm;
        compress_if_needed(transcript, &self.policy.history, |block| async move {
            let joined = block
                .iter()
                .map(|e| e.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Summarize these execution observations concisely, preserving anything later \
                 steps would need to refer back to:\n\n{joined}"
            );
            #[derive(Deserialize)]
            struct Summary {
                summary: String,
            }
            let reply: Summary = llm.ask(Role::Executor, &prompt).await?;
            Ok(reply.summary)
        })
        .await?;
        Ok(())
    }

    fn build_step_prompt(
        &self,
        ctx: &SubtaskContext,
        transcript: &[TranscriptEntry],
        step_index: u32,
    ) -> String {
        let tool_names: Vec<&str> = ctx.available_tools.iter().map(|t| t.name.as_str()).collect();
        let history = transcript
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Subtask: {}\nCompletion criteria: {}\nCausal context:\n{}\nAvailable tools: {}\nStep: {step_index}\nHistory:\n{}\n\n\
             Reply with a JSON object: {{\"thought\": string, \"execution_operations\": [{{\"tool\":string,\"params\":object,\"node_id\":string}}], \
             \"is_subtask_complete\": bool, \"summary\": string?, \"staged_causal_nodes\": [...]}}.",
            ctx.description,
            ctx.completion_criteria.as_deref().unwrap_or("(none given)"),
            ctx.causal_context,
            tool_names.join(", "),
            history,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        ctx: &SubtaskContext,
        stop_reason: StopReason,
        status: TaskStatus,
        failure_level: Option<FailureLevel>,
        steps: Vec<ExecutorStep>,
        transcript: Vec<TranscriptEntry>,
        staged_causal_nodes: Vec<StagedCausalNode>,
        summary: Option<String>,
    ) -> ExecutorOutcome {
        ExecutorOutcome {
            task_id: ctx.task_id.clone(),
            stop_reason,
            status,
            failure_level,
            steps,
            transcript,
            staged_causal_nodes,
            summary,
        }
    }
}

/// Normalizes `(tool, args)` for the repeated-action detector (§4.6, resolved
/// Open Question): tool name plus the JSON args re-serialized with sorted
/// object keys and trimmed string values. Collapses cosmetic restatements
/// (key order, trailing whitespace) without collapsing genuinely different
/// argument values.
pub fn normalize_action(tool: &str, args: &Value) -> String {
    format!("{tool}:{}", canonicalize_value(args))
}

fn canonicalize_value(value: &Value) -> String {
    match value {
        Value::String(s) => serde_json::to_string(s.trim()).unwrap_or_default(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonicalize_value).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let rendered: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonicalize_value(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlm;
    use crate::tool_source::{ToolCallContent, ToolSourceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx() -> SubtaskContext {
        SubtaskContext {
            task_id: "t1".into(),
            description: "probe /login".into(),
            completion_criteria: Some("identify auth mechanism".into()),
            causal_context: "(none yet)".into(),
            available_tools: vec![],
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl ToolSource for AlwaysFails {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
            Ok(vec![])
        }
        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
            _deadline: Duration,
        ) -> Result<ToolCallContent, ToolSourceError> {
            Err(ToolSourceError::JsonRpc("bad args".into()))
        }
    }

    struct AlwaysSucceeds;
    #[async_trait]
    impl ToolSource for AlwaysSucceeds {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
            Ok(vec![])
        }
        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
            _deadline: Duration,
        ) -> Result<ToolCallContent, ToolSourceError> {
            Ok(ToolCallContent {
                text: "200 OK".into(),
            })
        }
    }

    #[tokio::test]
    async fn subtask_complete_reply_ends_the_loop() {
        let driver = ExecutorDriver::new(
            LlmClient::new(StubLlm::single(
                r#"{"thought":"done","execution_operations":[],"is_subtask_complete":true,"summary":"found it"}"#,
            )),
            ToolHostClient::new(AlwaysSucceeds),
        );
        let outcome = driver
            .run_subtask(&ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::SubtaskComplete);
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.summary.as_deref(), Some("found it"));
    }

    #[tokio::test]
    async fn repeated_identical_failure_trips_the_detector() {
        let reply = r#"{"thought":"try login","execution_operations":[{"tool":"http_post","params":{"path":"/login  "},"node_id":"a1"}],"is_subtask_complete":false}"#;
        let driver = ExecutorDriver::new(
            LlmClient::new(StubLlm::new([reply, reply, reply])),
            ToolHostClient::new(AlwaysFails),
        );
        let outcome = driver
            .run_subtask(&ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::RepeatedAction);
        assert_eq!(outcome.failure_level, Some(FailureLevel::L2));
        assert_eq!(outcome.steps.len(), 3);
    }

    #[tokio::test]
    async fn halt_tool_stops_before_further_operations() {
        let driver = ExecutorDriver::new(
            LlmClient::new(StubLlm::single(
                r#"{"thought":"giving up","execution_operations":[{"tool":"halt_task","params":{},"node_id":"a1"}],"is_subtask_complete":false}"#,
            )),
            ToolHostClient::new(AlwaysSucceeds),
        );
        let outcome = driver
            .run_subtask(&ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Halted);
        assert!(outcome.steps.is_empty());
    }

    #[tokio::test]
    async fn step_budget_exceeded_marks_stalled() {
        let reply = r#"{"thought":"thinking","execution_operations":[],"is_subtask_complete":false}"#;
        let driver = ExecutorDriver::with_policy(
            LlmClient::new(StubLlm::single(reply)),
            ToolHostClient::new(AlwaysSucceeds),
            ExecutorPolicy {
                step_budget: 2,
                ..ExecutorPolicy::default()
            },
        );
        let outcome = driver
            .run_subtask(&ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::StepBudgetExceeded);
        assert_eq!(outcome.status, TaskStatus::Stalled);
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_the_next_step() {
        let reply = r#"{"thought":"thinking","execution_operations":[],"is_subtask_complete":false}"#;
        let driver = ExecutorDriver::new(
            LlmClient::new(StubLlm::single(reply)),
            ToolHostClient::new(AlwaysSucceeds),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = driver.run_subtask(&ctx(), &cancel).await.unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.status, TaskStatus::Aborted);
    }

    #[test]
    fn normalize_action_collapses_whitespace_and_key_order() {
        let a = normalize_action(
            "http_post",
            &serde_json::json!({"path": "/login  ", "method": "POST"}),
        );
        let b = normalize_action(
            "http_post",
            &serde_json::json!({"method": "POST", "path": "/login"}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_action_distinguishes_real_differences() {
        let a = normalize_action("http_post", &serde_json::json!({"path": "/login"}));
        let b = normalize_action("http_post", &serde_json::json!({"path": "/admin"}));
        assert_ne!(a, b);
    }
}
