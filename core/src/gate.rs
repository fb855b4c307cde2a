//! Intervention Gate (§4.8): suspends plan application until a human decision
//! arrives, or auto-approves when HITL is disabled.
//!
//! **Interaction**: the Scheduler calls [`InterventionGate::submit`] with a
//! staged batch before every `APPLY`; the returned future resolves once
//! `resolve` is called for that request's id (from a UI, CLI, or API handler)
//! or immediately if HITL is off.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use weft_event::InterventionAction;

/// The human decision for one pending batch.
#[derive(Clone, Debug)]
pub enum Decision {
    Approve,
    Modify(Value),
    Reject(String),
}

impl Decision {
    pub fn action(&self) -> InterventionAction {
        match self {
            Decision::Approve => InterventionAction::Approve,
            Decision::Modify(_) => InterventionAction::Modify,
            Decision::Reject(_) => InterventionAction::Reject,
        }
    }
}

struct Pending {
    sender: Option<oneshot::Sender<Decision>>,
    /// Kept so a late duplicate `resolve` can be accepted-and-ignored (P7)
    /// rather than treated as an unknown request id.
    resolved: bool,
    /// The staged batch, retained so a checkpoint taken while this request is
    /// outstanding can recover it for a reconnecting UI (§4.8, §6.4).
    batch: Value,
}

/// One operation's intervention gate. HITL can be disabled entirely, in which
/// case every `submit` auto-approves without ever suspending.
pub struct InterventionGate {
    hitl_enabled: bool,
    pending: Mutex<HashMap<String, Pending>>,
}

impl InterventionGate {
    pub fn new(hitl_enabled: bool) -> Self {
        Self {
            hitl_enabled,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stages `batch` under `req_id` without waiting for a decision, returning
    /// the receiver to await it on. Returns `None` when HITL is disabled
    /// (nothing is registered, so there is nothing for a reconnecting UI to
    /// see — callers should treat `None` as an immediate `Decision::Approve`).
    ///
    /// Split out from [`Self::submit`] so a caller can checkpoint the pending
    /// request (§4.8, §6.4) between staging it and awaiting its resolution.
    pub fn register(&self, req_id: String, batch: Value) -> Option<oneshot::Receiver<Decision>> {
        if !self.hitl_enabled {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        let mut pending = self.pending.lock().expect("gate lock poisoned");
        pending.insert(
            req_id,
            Pending {
                sender: Some(sender),
                resolved: false,
                batch,
            },
        );
        Some(receiver)
    }

    /// Awaits a decision on a receiver returned by [`Self::register`], folding
    /// a dropped sender into an explicit rejection.
    pub async fn wait(receiver: oneshot::Receiver<Decision>) -> Decision {
        receiver
            .await
            .unwrap_or_else(|_| Decision::Reject("gate dropped without a decision".into()))
    }

    /// Stages `batch` under `req_id` and waits for a decision. If HITL is
    /// disabled, returns `Decision::Approve` immediately without registering
    /// a pending request (so there is nothing for a reconnecting UI to see).
    pub async fn submit(&self, req_id: String, batch: Value) -> Decision {
        match self.register(req_id, batch) {
            Some(receiver) => Self::wait(receiver).await,
            None => Decision::Approve,
        }
    }

    /// Resolves a pending request. A second call for an id that is already
    /// resolved (or was never registered, e.g. HITL disabled) is accepted and
    /// ignored rather than erroring (P7) — idempotent by design so a retried
    /// UI action never panics the caller.
    pub fn resolve(&self, req_id: &str, decision: Decision) {
        let mut pending = self.pending.lock().expect("gate lock poisoned");
        if let Some(entry) = pending.get_mut(req_id) {
            if entry.resolved {
                return;
            }
            entry.resolved = true;
            if let Some(sender) = entry.sender.take() {
                let _ = sender.send(decision);
            }
        }
    }

    /// Rejects every still-pending request with `reason` (used on operation abort).
    pub fn reject_all(&self, reason: &str) {
        let mut pending = self.pending.lock().expect("gate lock poisoned");
        for (_, entry) in pending.iter_mut() {
            if entry.resolved {
                continue;
            }
            entry.resolved = true;
            if let Some(sender) = entry.sender.take() {
                let _ = sender.send(Decision::Reject(reason.to_string()));
            }
        }
    }

    /// Whether `req_id` is currently awaiting a decision.
    pub fn is_pending(&self, req_id: &str) -> bool {
        let pending = self.pending.lock().expect("gate lock poisoned");
        pending.get(req_id).map(|p| !p.resolved).unwrap_or(false)
    }

    /// Every still-outstanding `{req_id, batch}` pair, for a checkpoint taken
    /// while one or more interventions are awaiting a human decision (§4.8:
    /// "Pending requests are persisted so that a UI reconnect after restart
    /// sees the same pending request").
    pub fn pending_requests(&self) -> Vec<Value> {
        let pending = self.pending.lock().expect("gate lock poisoned");
        pending
            .iter()
            .filter(|(_, p)| !p.resolved)
            .map(|(req_id, p)| serde_json::json!({"req_id": req_id, "batch": p.batch}))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_hitl_auto_approves() {
        let gate = InterventionGate::new(false);
        let decision = gate.submit("req-1".into(), Value::Null).await;
        assert!(matches!(decision, Decision::Approve));
        assert!(!gate.is_pending("req-1"));
    }

    #[tokio::test]
    async fn enabled_hitl_blocks_until_resolved() {
        let gate = std::sync::Arc::new(InterventionGate::new(true));
        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move { gate2.submit("req-1".into(), Value::Null).await });

        tokio::task::yield_now().await;
        assert!(gate.is_pending("req-1"));
        gate.resolve("req-1", Decision::Approve);

        let decision = waiter.await.unwrap();
        assert!(matches!(decision, Decision::Approve));
    }

    #[tokio::test]
    async fn second_resolution_is_accepted_and_ignored() {
        let gate = InterventionGate::new(true);
        let waiter = gate.submit("req-1".into(), Value::Null);
        tokio::pin!(waiter);

        gate.resolve("req-1", Decision::Reject("first".into()));
        gate.resolve("req-1", Decision::Approve);

        let decision = waiter.await;
        assert!(matches!(decision, Decision::Reject(reason) if reason == "first"));
    }

    #[tokio::test]
    async fn pending_requests_carries_the_staged_batch_until_resolved() {
        let gate = std::sync::Arc::new(InterventionGate::new(true));
        let gate2 = gate.clone();
        let batch = serde_json::json!([{"command": "ADD_NODE", "node_data": {"id": "t1"}}]);
        let waiter = {
            let batch = batch.clone();
            tokio::spawn(async move { gate2.submit("req-1".into(), batch).await })
        };
        tokio::task::yield_now().await;

        let pending = gate.pending_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["req_id"], "req-1");
        assert_eq!(pending[0]["batch"], batch);

        gate.resolve("req-1", Decision::Approve);
        waiter.await.unwrap();
        assert!(gate.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn reject_all_resolves_every_pending_request() {
        let gate = std::sync::Arc::new(InterventionGate::new(true));
        let g1 = gate.clone();
        let g2 = gate.clone();
        let w1 = tokio::spawn(async move { g1.submit("a".into(), Value::Null).await });
        let w2 = tokio::spawn(async move { g2.submit("b".into(), Value::Null).await });
        tokio::task::yield_now().await;

        gate.reject_all("operation aborted");

        assert!(matches!(w1.await.unwrap(), Decision::Reject(_)));
        assert!(matches!(w2.await.unwrap(), Decision::Reject(_)));
    }

    #[test]
    fn modify_decision_carries_action_tag() {
        assert!(matches!(
            Decision::Modify(Value::Null).action(),
            InterventionAction::Modify
        ));
    }
}
