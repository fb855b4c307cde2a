//! Planner Driver (§4.5): inspects both graphs and proposes the next batch of
//! mutation commands, or declares the goal achieved.
//!
//! Like [`crate::llm::LlmClient`], this module has no Broker or Graph Store
//! dependency — it is given a pre-rendered [`PlanRequest`] and returns a typed
//! [`PlanReply`]; the Scheduler is responsible for rendering the graph summary,
//! staging the reply through the Intervention Gate, and applying it.

use serde::Deserialize;

use weft_event::Role;

use crate::error::CoreError;
use crate::graph::GraphCommand;
use crate::llm::{LlmClient, LlmTransport};

/// Everything the Planner prompt needs, already rendered to text by the caller.
#[derive(Clone, Debug, Default)]
pub struct PlanRequest {
    pub goal: String,
    /// `None` on the very first call: the Planner sees only the goal and must
    /// emit at least one task (§4.5, "Initial vs dynamic plans").
    pub graph_summary: Option<String>,
    pub recent_failures: Vec<String>,
    /// Opaque retrieved guidance (RAG input); rendered verbatim if present.
    pub guidance: Option<String>,
}

/// The Planner's expected reply shape.
#[derive(Clone, Debug, Deserialize)]
pub struct PlanReply {
    pub thought: String,
    #[serde(default)]
    pub graph_operations: Vec<GraphCommand>,
    pub goal_achieved: bool,
}

/// Whether `reply` is the stall condition from §4.5: no new commands and the
/// goal is not declared achieved. The Scheduler escalates this rather than
/// looping the Planner forever on an empty batch.
pub fn is_stall(reply: &PlanReply) -> bool {
    reply.graph_operations.is_empty() && !reply.goal_achieved
}

pub struct PlannerDriver<T: LlmTransport> {
    client: LlmClient<T>,
    /// Character budget for the rendered graph summary section of the prompt
    /// (a proxy for the token budget §4.5 calls for; this runtime has no
    /// tokenizer handy at prompt-assembly time).
    graph_summary_budget_chars: usize,
}

impl<T: LlmTransport> PlannerDriver<T> {
    pub fn new(client: LlmClient<T>) -> Self {
        Self {
            client,
            graph_summary_budget_chars: 12_000,
        }
    }

    pub fn with_graph_summary_budget(client: LlmClient<T>, budget_chars: usize) -> Self {
        Self {
            client,
            graph_summary_budget_chars: budget_chars,
        }
    }

    /// Renders `request` into a prompt and asks for the next batch.
    pub async fn plan(&self, request: &PlanRequest) -> Result<PlanReply, CoreError> {
        let prompt = self.build_prompt(request);
        self.client.ask(Role::Planner, &prompt).await
    }

    fn build_prompt(&self, request: &PlanRequest) -> String {
        let mut sections = vec![format!("Goal:\n{}", request.goal)];

        match &request.graph_summary {
            Some(summary) => {
                let bounded = bound_chars(summary, self.graph_summary_budget_chars);
                sections.push(format!("Current graph state:\n{bounded}"));
            }
            None => sections.push(
                "No graph exists yet. Emit at least one task via ADD_NODE.".to_string(),
            ),
        }

        if !request.recent_failures.is_empty() {
            sections.push(format!(
                "Recent failures:\n- {}",
                request.recent_failures.join("\n- ")
            ));
        }

        if let Some(guidance) = &request.guidance {
            sections.push(format!("Guidance:\n{guidance}"));
        }

        sections.push(
            "Reply with a JSON object: {\"thought\": string, \"graph_operations\": [...], \"goal_achieved\": bool}."
                .to_string(),
        );

        sections.join("\n\n")
    }
}

/// Truncates `text` to at most `budget_chars` characters (UTF-8 safe),
/// appending a marker so the Planner knows the summary was cut.
fn bound_chars(text: &str, budget_chars: usize) -> String {
    if text.chars().count() <= budget_chars {
        return text.to_string();
    }
    let mut bounded: String = text.chars().take(budget_chars).collect();
    bounded.push_str("\n...[graph summary truncated]");
    bounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphCommand, NodeKind};
    use crate::llm::StubLlm;

    #[tokio::test]
    async fn first_call_prompt_has_no_graph_section() {
        let planner = PlannerDriver::new(LlmClient::new(StubLlm::single(
            r#"{"thought":"start","graph_operations":[],"goal_achieved":false}"#,
        )));
        let request = PlanRequest {
            goal: "probe example.com".into(),
            graph_summary: None,
            recent_failures: vec![],
            guidance: None,
        };
        let prompt = planner.build_prompt(&request);
        assert!(prompt.contains("No graph exists yet"));
    }

    #[tokio::test]
    async fn plan_deserializes_graph_operations() {
        let planner = PlannerDriver::new(LlmClient::new(StubLlm::single(
            r#"{"thought":"add task","graph_operations":[{"command":"ADD_NODE","node_data":{"id":"t1","kind":"task","description":"scan ports"}}],"goal_achieved":false}"#,
        )));
        let request = PlanRequest {
            goal: "probe".into(),
            graph_summary: None,
            recent_failures: vec![],
            guidance: None,
        };
        let reply = planner.plan(&request).await.unwrap();
        assert_eq!(reply.graph_operations.len(), 1);
        match &reply.graph_operations[0] {
            GraphCommand::AddNode { node_data } => {
                assert_eq!(node_data.id, "t1");
                assert_eq!(node_data.kind, NodeKind::Task);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn stall_requires_empty_batch_and_unmet_goal() {
        let stalled = PlanReply {
            thought: "nothing left".into(),
            graph_operations: vec![],
            goal_achieved: false,
        };
        assert!(is_stall(&stalled));

        let achieved = PlanReply {
            thought: "done".into(),
            graph_operations: vec![],
            goal_achieved: true,
        };
        assert!(!is_stall(&achieved));
    }

    #[test]
    fn graph_summary_is_bounded() {
        let long = "x".repeat(100);
        let bounded = bound_chars(&long, 10);
        assert!(bounded.starts_with("xxxxxxxxxx"));
        assert!(bounded.contains("truncated"));
    }
}
