//! Tool Host Client (§4.3): the tool host is an opaque RPC server exposing
//! `list_tools() -> [ToolSpec]` and `call_tool(name, args, deadline) -> ToolCallContent`.
//!
//! [`ToolHostClient`] wraps any [`ToolSource`] with the two safety properties every
//! adapter must have regardless of transport: exponential-backoff retry on transient
//! transport errors (non-transient errors — schema mismatch, tool-reported failure —
//! return immediately), and byte-budget truncation of oversized tool output. The
//! reference adapter, [`mcp::McpToolSource`], talks MCP over stdio or HTTP.

pub mod mcp;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::CoreError;

/// One tool the host exposes: name, optional description, and its JSON Schema input shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// The text content of a successful tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallContent {
    pub text: String,
}

/// Local failure modes for a tool host adapter.
#[derive(Debug, thiserror::Error)]
pub enum ToolSourceError {
    /// Transient transport failure (connection refused, broken pipe): retryable.
    #[error("transport: {0}")]
    Transport(String),

    /// The tool host's JSON-RPC layer reported an error for this call: not retryable.
    #[error("jsonrpc: {0}")]
    JsonRpc(String),

    /// The call's individual deadline elapsed before a result arrived.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ToolSourceError {
    /// Only transport failures are worth retrying; a JSON-RPC error means the tool
    /// host understood the call and rejected it, and a timeout means it is already
    /// past its deadline (retrying would just restart the clock without the caller
    /// having asked for that).
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolSourceError::Transport(_))
    }
}

impl From<ToolSourceError> for CoreError {
    fn from(err: ToolSourceError) -> Self {
        match err {
            ToolSourceError::Transport(msg) => CoreError::Transport(msg),
            ToolSourceError::JsonRpc(msg) => CoreError::Validation(msg),
            ToolSourceError::Timeout(d) => {
                CoreError::Transport(format!("tool call timed out after {d:?}"))
            }
        }
    }
}

/// One tool host adapter. Implementations: [`mcp::McpToolSource`] (stdio or HTTP).
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError>;

    /// `deadline` bounds this one call; adapters must stop waiting and return
    /// `ToolSourceError::Timeout` once it elapses rather than block indefinitely.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<ToolCallContent, ToolSourceError>;
}

/// Retry/truncation policy for [`ToolHostClient`].
#[derive(Clone, Copy, Debug)]
pub struct ToolHostPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Tool output longer than this many bytes is truncated with a marker.
    pub max_response_bytes: usize,
}

impl Default for ToolHostPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            max_response_bytes: 64 * 1024,
        }
    }
}

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Wraps a [`ToolSource`] with backoff retry on transient errors and output
/// truncation, so every adapter gets both without re-implementing them.
pub struct ToolHostClient<S: ToolSource> {
    source: S,
    policy: ToolHostPolicy,
}

impl<S: ToolSource> ToolHostClient<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            policy: ToolHostPolicy::default(),
        }
    }

    pub fn with_policy(source: S, policy: ToolHostPolicy) -> Self {
        Self { source, policy }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        self.source.list_tools().await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        deadline: Duration,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let mut delay = self.policy.backoff_base;
        for attempt in 0..self.policy.max_attempts {
            let call = self.source.call_tool(name, arguments.clone(), deadline);
            let result = match timeout(deadline, call).await {
                Ok(r) => r,
                Err(_) => Err(ToolSourceError::Timeout(deadline)),
            };
            match result {
                Ok(content) => return Ok(self.truncate(content)),
                Err(err) if err.is_transient() && attempt + 1 < self.policy.max_attempts => {
                    debug!(tool = name, attempt, error = %err, "tool call transport error, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    warn!(tool = name, error = %err, "tool call failed");
                    return Err(err);
                }
            }
        }
        unreachable!("loop always returns within max_attempts iterations")
    }

    fn truncate(&self, mut content: ToolCallContent) -> ToolCallContent {
        if content.text.len() > self.policy.max_response_bytes {
            let mut cut = self.policy.max_response_bytes;
            while cut > 0 && !content.text.is_char_boundary(cut) {
                cut -= 1;
            }
            content.text.truncate(cut);
            content.text.push_str(TRUNCATION_MARKER);
        }
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        failures_left: AtomicU32,
        response: String,
    }

    #[async_trait]
    impl ToolSource for FlakySource {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
            _deadline: Duration,
        ) -> Result<ToolCallContent, ToolSourceError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ToolSourceError::Transport("connection refused".into()));
            }
            Ok(ToolCallContent {
                text: self.response.clone(),
            })
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let client = ToolHostClient::with_policy(
            FlakySource {
                failures_left: AtomicU32::new(2),
                response: "ok".into(),
            },
            ToolHostPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
                max_response_bytes: 1024,
            },
        );
        let result = client
            .call_tool("probe", Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.text, "ok");
    }

    #[tokio::test]
    async fn jsonrpc_error_is_not_retried() {
        struct AlwaysJsonRpcError;
        #[async_trait]
        impl ToolSource for AlwaysJsonRpcError {
            async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
                Ok(vec![])
            }
            async fn call_tool(
                &self,
                _name: &str,
                _arguments: Value,
                _deadline: Duration,
            ) -> Result<ToolCallContent, ToolSourceError> {
                Err(ToolSourceError::JsonRpc("bad params".into()))
            }
        }
        let client = ToolHostClient::new(AlwaysJsonRpcError);
        let result = client
            .call_tool("probe", Value::Null, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ToolSourceError::JsonRpc(_))));
    }

    #[tokio::test]
    async fn oversized_response_is_truncated_with_marker() {
        let client = ToolHostClient::with_policy(
            FlakySource {
                failures_left: AtomicU32::new(0),
                response: "x".repeat(100),
            },
            ToolHostPolicy {
                max_attempts: 1,
                backoff_base: Duration::from_millis(1),
                max_response_bytes: 10,
            },
        );
        let result = client
            .call_tool("probe", Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.text.starts_with(&"x".repeat(10)));
        assert!(result.text.ends_with("[truncated]"));
    }
}
