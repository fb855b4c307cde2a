//! LLM Client (§4.4): a role-parameterized `ask(role, prompt) -> T` request.
//!
//! Unlike a ReAct think-node's `invoke(messages) -> (text, tool_calls)`, drivers here
//! ask for one typed JSON reply per turn and name which underlying model answers it
//! via [`weft_event::Role`]. [`LlmClient`] wraps an [`LlmTransport`] with two retry
//! loops: transport errors retry with exponential backoff (bounded), and schema
//! validation failures retry with the validator's error folded back into the prompt
//! (also bounded). Callers own the event broker handle and are responsible for
//! publishing `llm.request` / `llm.response` around each `ask()`; this module has no
//! broker dependency so it can be unit-tested in isolation.

mod mock;
mod openai;

pub use mock::StubLlm;
pub use openai::{OpenAiTransport, RoleModels};

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use weft_event::Role;

use crate::error::CoreError;

/// Local failure modes for the LLM client, converted into [`CoreError`] at `ask()`'s boundary.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (connection refused, timeout, non-2xx, ...).
    #[error("llm transport: {0}")]
    Transport(String),

    /// Reply text could not be parsed as JSON or did not match the expected schema.
    #[error("llm response invalid: {0}")]
    InvalidResponse(String),
}

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Transport(msg) => CoreError::Transport(msg),
            LlmError::InvalidResponse(msg) => CoreError::Validation(msg),
        }
    }
}

/// Retry/backoff knobs for [`LlmClient::ask`].
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Max attempts for transport errors before giving up.
    pub max_transport_attempts: u32,
    /// Base delay for exponential backoff between transport attempts.
    pub backoff_base: Duration,
    /// Max attempts where a validation failure re-prompts with the error appended.
    pub max_validation_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transport_attempts: 3,
            backoff_base: Duration::from_millis(200),
            max_validation_attempts: 2,
        }
    }
}

/// A raw completion backend: send a role-tagged prompt, get back response text.
///
/// Implementations: [`StubLlm`] (tests), [`OpenAiTransport`] (feature `openai`,
/// via `async-openai`).
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn complete(&self, role: Role, prompt: &str) -> Result<String, LlmError>;
}

/// Wraps an [`LlmTransport`] with the two retry loops described in §4.4.
pub struct LlmClient<T: LlmTransport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: LlmTransport> LlmClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Sends `prompt` tagged with `role`, parses the reply as `R`, and retries
    /// transport errors (backoff) and validation errors (error appended to the
    /// prompt) within the bounds of [`RetryPolicy`].
    pub async fn ask<R: DeserializeOwned>(&self, role: Role, prompt: &str) -> Result<R, CoreError> {
        let mut prompt = prompt.to_string();

        for validation_attempt in 0..self.policy.max_validation_attempts {
            let text = self.complete_with_backoff(role, &prompt).await?;
            match serde_json::from_str::<R>(&text) {
                Ok(value) => return Ok(value),
                Err(parse_err) => {
                    warn!(
                        role = ?role,
                        attempt = validation_attempt,
                        error = %parse_err,
                        "llm reply failed schema validation"
                    );
                    if validation_attempt + 1 >= self.policy.max_validation_attempts {
                        return Err(CoreError::Validation(format!(
                            "reply did not match expected schema after {} attempt(s): {}",
                            validation_attempt + 1,
                            parse_err
                        )));
                    }
                    prompt = format!(
                        "{prompt}\n\nYour previous reply failed validation with error: {parse_err}. \
                         Reply again with JSON that matches the required schema exactly."
                    );
                }
            }
        }

        unreachable!("loop always returns within max_validation_attempts iterations")
    }

    async fn complete_with_backoff(&self, role: Role, prompt: &str) -> Result<String, CoreError> {
        let mut delay = self.policy.backoff_base;
        for attempt in 0..self.policy.max_transport_attempts {
            match self.transport.complete(role, prompt).await {
                Ok(text) => return Ok(text),
                Err(LlmError::Transport(msg)) => {
                    debug!(role = ?role, attempt, error = %msg, "llm transport error, retrying");
                    if attempt + 1 >= self.policy.max_transport_attempts {
                        return Err(CoreError::Transport(msg));
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(other @ LlmError::InvalidResponse(_)) => return Err(other.into()),
            }
        }
        unreachable!("loop always returns within max_transport_attempts iterations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Deserialize, Debug, PartialEq)]
    struct Reply {
        thought: String,
        goal_achieved: bool,
    }

    struct FlakyTransport {
        transport_failures_left: AtomicU32,
        responses: Vec<&'static str>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmTransport for FlakyTransport {
        async fn complete(&self, _role: Role, _prompt: &str) -> Result<String, LlmError> {
            if self.transport_failures_left.load(Ordering::SeqCst) > 0 {
                self.transport_failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::Transport("connection refused".into()));
            }
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(self
                .responses
                .get(idx.min(self.responses.len() - 1))
                .unwrap()
                .to_string())
        }
    }

    #[tokio::test]
    async fn ask_succeeds_on_first_valid_reply() {
        let client = LlmClient::new(FlakyTransport {
            transport_failures_left: AtomicU32::new(0),
            responses: vec![r#"{"thought":"ok","goal_achieved":true}"#],
            calls: AtomicU32::new(0),
        });
        let reply: Reply = client.ask(Role::Planner, "goal: ship it").await.unwrap();
        assert_eq!(
            reply,
            Reply {
                thought: "ok".into(),
                goal_achieved: true
            }
        );
    }

    #[tokio::test]
    async fn ask_retries_transport_errors_then_succeeds() {
        let client = LlmClient::with_policy(
            FlakyTransport {
                transport_failures_left: AtomicU32::new(2),
                responses: vec![r#"{"thought":"ok","goal_achieved":false}"#],
                calls: AtomicU32::new(0),
            },
            RetryPolicy {
                max_transport_attempts: 3,
                backoff_base: Duration::from_millis(1),
                max_validation_attempts: 1,
            },
        );
        let reply: Reply = client.ask(Role::Executor, "do it").await.unwrap();
        assert!(!reply.goal_achieved);
    }

    #[tokio::test]
    async fn ask_exhausting_transport_retries_returns_transport_error() {
        let client = LlmClient::with_policy(
            FlakyTransport {
                transport_failures_left: AtomicU32::new(5),
                responses: vec![r#"{"thought":"ok","goal_achieved":true}"#],
                calls: AtomicU32::new(0),
            },
            RetryPolicy {
                max_transport_attempts: 2,
                backoff_base: Duration::from_millis(1),
                max_validation_attempts: 1,
            },
        );
        let result: Result<Reply, CoreError> = client.ask(Role::Reflector, "x").await;
        assert!(matches!(result, Err(CoreError::Transport(_))));
    }

    #[tokio::test]
    async fn ask_retries_invalid_json_with_error_folded_into_prompt() {
        let client = LlmClient::with_policy(
            FlakyTransport {
                transport_failures_left: AtomicU32::new(0),
                responses: vec!["not json", r#"{"thought":"fixed","goal_achieved":true}"#],
                calls: AtomicU32::new(0),
            },
            RetryPolicy {
                max_transport_attempts: 1,
                backoff_base: Duration::from_millis(1),
                max_validation_attempts: 2,
            },
        );
        let reply: Reply = client.ask(Role::Planner, "goal").await.unwrap();
        assert_eq!(reply.thought, "fixed");
    }

    #[tokio::test]
    async fn ask_exhausting_validation_retries_returns_validation_error() {
        let client = LlmClient::with_policy(
            FlakyTransport {
                transport_failures_left: AtomicU32::new(0),
                responses: vec!["still not json"],
                calls: AtomicU32::new(0),
            },
            RetryPolicy {
                max_transport_attempts: 1,
                backoff_base: Duration::from_millis(1),
                max_validation_attempts: 2,
            },
        );
        let result: Result<Reply, CoreError> = client.ask(Role::Planner, "goal").await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
