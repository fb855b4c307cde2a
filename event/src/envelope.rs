//! Wire envelope: assigns `seq` and `timestamp` to an [`EventBody`], producing the
//! `{seq, timestamp, event, role?, data}` record that crosses the operation boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

use crate::event::{EventBody, Role};

/// One wire-format event, ready for the broker to fan out or a subscriber to deserialize.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: u64,
    pub role: Option<Role>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Per-operation monotonic sequence generator. One instance lives with the operation's broker.
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Wraps `body` into a wire [`Event`], assigning the next sequence number and the
    /// current wall-clock timestamp (milliseconds since epoch).
    pub fn next_event(&self, role: Option<Role>, body: EventBody) -> Event {
        let seq = self.next.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Event {
            seq,
            timestamp,
            role,
            body,
        }
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let counter = SequenceCounter::new();
        let e1 = counter.next_event(None, EventBody::Heartbeat);
        let e2 = counter.next_event(None, EventBody::Heartbeat);
        assert!(e2.seq > e1.seq);
    }

    #[test]
    fn event_serializes_flat() {
        let counter = SequenceCounter::new();
        let e = counter.next_event(Some(Role::Planner), EventBody::MissionAccomplished);
        let v = e.to_value().unwrap();
        assert_eq!(v["event"], "mission.accomplished");
        assert_eq!(v["role"], "planner");
        assert!(v.get("seq").is_some());
        assert!(v.get("timestamp").is_some());
    }
}
