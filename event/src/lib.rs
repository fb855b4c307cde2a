//! Wire event protocol for a weft operation: typed event bodies plus the
//! `{seq, timestamp, event, role?, data}` envelope that crosses the operation boundary.
//!
//! This crate has no dependency on the runtime; the broker bridges internal
//! notifications into [`EventBody`] and calls [`SequenceCounter::next_event`].

pub mod envelope;
pub mod event;

pub use envelope::{Event, SequenceCounter};
pub use event::{EventBody, InterventionAction, Phase, RejectReason, Role};
