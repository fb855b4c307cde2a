//! Fixed-response transport for tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use weft_event::Role;

use super::{LlmError, LlmTransport};

/// Returns a queue of canned replies, one per call, regardless of role or prompt.
/// The last reply repeats once the queue is drained, so callers that `ask()` more
/// times than they configured replies for don't panic mid-test.
pub struct StubLlm {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl StubLlm {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
        }
    }

    pub fn single(reply: impl Into<String>) -> Self {
        Self::new([reply.into()])
    }
}

#[async_trait]
impl LlmTransport for StubLlm {
    async fn complete(&self, _role: Role, _prompt: &str) -> Result<String, LlmError> {
        let mut queue = self.replies.lock().expect("stub mutex poisoned");
        if let Some(next) = queue.pop_front() {
            *self.last.lock().expect("stub mutex poisoned") = Some(next.clone());
            Ok(next)
        } else if let Some(last) = self.last.lock().expect("stub mutex poisoned").clone() {
            Ok(last)
        } else {
            Err(LlmError::Transport("StubLlm has no configured replies".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_replies_in_order() {
        let stub = StubLlm::new(["first", "second"]);
        assert_eq!(
            stub.complete(Role::Planner, "p").await.unwrap(),
            "first"
        );
        assert_eq!(
            stub.complete(Role::Planner, "p").await.unwrap(),
            "second"
        );
    }

    #[tokio::test]
    async fn repeats_last_reply_once_drained() {
        let stub = StubLlm::single("only");
        assert_eq!(stub.complete(Role::Executor, "p").await.unwrap(), "only");
        assert_eq!(stub.complete(Role::Executor, "p").await.unwrap(), "only");
    }

    #[tokio::test]
    async fn errors_when_never_configured() {
        let stub = StubLlm::new(Vec::<String>::new());
        assert!(stub.complete(Role::Reflector, "p").await.is_err());
    }
}
