//! Root error taxonomy returned from Core APIs (§7).
//!
//! Every component-local error enum (`GraphError`, `CheckpointError`, `ToolHostError`,
//! `LlmError`, ...) converts into one of these six buckets at its component boundary.
//! The conversion site is where the recovery policy gets decided, so conversions are
//! explicit `From` impls or mapping functions, never a blanket `From<anyhow::Error>`.

use thiserror::Error;

/// Taxonomy of failures a Core operation can surface.
///
/// Recovery policy lives with the caller (Scheduler/driver), not here: this enum
/// only carries enough detail to render the corresponding event or terminal status.
#[derive(Debug, Error)]
pub enum CoreError {
    /// LLM or tool host unreachable; retried with backoff before this is raised.
    #[error("transport: {0}")]
    Transport(String),

    /// LLM reply failed schema validation after exhausting retries.
    #[error("validation: {0}")]
    Validation(String),

    /// A graph mutation command violates a data-model invariant.
    #[error("invariant: {0}")]
    Invariant(String),

    /// A step/time/token budget was exceeded.
    #[error("budget exceeded: {0}")]
    Budget(String),

    /// A cooperative cancellation signal was observed.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Unrecoverable: operation state is corrupt or an invariant the Core depends
    /// on for safety (not just correctness) no longer holds.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Whether the caller should retry this error with backoff rather than
    /// treat it as terminal. Only `Transport` is retryable at this layer;
    /// `Validation` retries happen one level down, against the schema, with
    /// the error folded back into the prompt rather than retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }
}
