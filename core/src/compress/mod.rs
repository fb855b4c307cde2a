//! Context and history compaction.
//!
//! [`history`] is the byte-threshold transcript compaction the Executor
//! Driver uses for a subtask's step log (§4.6 step 4): when the accumulated
//! transcript outgrows a configured byte budget, the oldest block is folded
//! into a single summary message and the latest K steps are kept verbatim.

pub mod history;

pub use history::{accumulated_bytes, compress_if_needed, HistoryCompactionConfig, TranscriptEntry};
