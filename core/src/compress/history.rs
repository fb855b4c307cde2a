//! Executor history compression (§4.6 step 4): once accumulated transcript
//! bytes exceed a threshold, the oldest block is replaced by a single LLM-written
//! summary; the latest `retain_recent_steps` steps always stay verbatim.
//!
//! Unlike a token-budget trigger for a ReAct message window (`CompactionConfig`
//! in `loom/src/compress/config.rs`), the Executor's transcript is compacted
//! on raw byte size — the subtask loop has no token-usage feedback from the
//! provider to estimate against.

use serde::{Deserialize, Serialize};

/// One step of an Executor subtask's transcript: either a verbatim
/// thought/action/observation record, or a previously-produced summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    #[serde(default)]
    pub is_summary: bool,
}

impl TranscriptEntry {
    pub fn verbatim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_summary: false,
        }
    }

    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_summary: true,
        }
    }
}

/// Byte-threshold history compaction knobs for one subtask's transcript.
#[derive(Clone, Copy, Debug)]
pub struct HistoryCompactionConfig {
    /// Compress once the transcript's total text bytes exceed this.
    pub max_history_bytes: usize,
    /// Steps at the tail that are never folded into a summary.
    pub retain_recent_steps: usize,
}

impl Default for HistoryCompactionConfig {
    fn default() -> Self {
        Self {
            max_history_bytes: 32 * 1024,
            retain_recent_steps: 6,
        }
    }
}

/// Total text bytes currently held across `entries`.
pub fn accumulated_bytes(entries: &[TranscriptEntry]) -> usize {
    entries.iter().map(|e| e.text.len()).sum()
}

/// Compresses `entries` in place if over budget. `summarize` is given the
/// oldest block (everything before the retained tail) and must return one
/// summary string; it is expected to be a secondary LLM call restricted to
/// "summarize these observations" per §4.6. Returns whether a compression
/// actually happened (`false` if under budget, or if there is no block outside
/// the retained tail to fold).
pub async fn compress_if_needed<F, Fut>(
    entries: &mut Vec<TranscriptEntry>,
    config: &HistoryCompactionConfig,
    summarize: F,
) -> Result<bool, crate::error::CoreError>
where
    F: FnOnce(Vec<TranscriptEntry>) -> Fut,
    Fut: std::future::Future<Output = Result<String, crate::error::CoreError>>,
{
    if accumulated_bytes(entries) <= config.max_history_bytes {
        return Ok(false);
    }
    if entries.len() <= config.retain_recent_steps {
        return Ok(false);
    }

    let split_at = entries.len() - config.retain_recent_steps;
    let recent = entries.split_off(split_at);
    let oldest_block = std::mem::take(entries);

    let summary_text = summarize(oldest_block).await?;
    entries.push(TranscriptEntry::summary(summary_text));
    entries.extend(recent);
    Ok(true)
}
