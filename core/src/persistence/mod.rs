//! # Persistence: crash-consistent operation checkpoints
//!
//! One [`OperationCheckpoint`] per operation: the dual graph, the event-log tail,
//! pending intervention requests, and operation metadata/status (§6.4).
//!
//! | Type                   | Persistence | Use case                |
//! |-------------------------|-------------|--------------------------|
//! | [`InMemoryCheckpointer`] | In-memory   | Dev, tests               |
//! | [`SqliteCheckpointer`]   | SQLite file | Single-node, production  |
//!
//! Checkpoint ids for any future per-node identifiers are minted with [`uuid6`],
//! which sorts lexicographically by creation time.

mod checkpointer;
mod in_memory;
mod sqlite;
pub mod uuid6;

pub use checkpointer::{CheckpointError, Checkpointer, OperationCheckpoint};
pub use in_memory::InMemoryCheckpointer;
pub use sqlite::SqliteCheckpointer;
pub use uuid6::{uuid6, uuid6_with_params, Uuid6};
