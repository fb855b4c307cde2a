//! Event Broker (§4.2): fans out wire [`Event`]s to every subscriber of an
//! operation, with bounded per-subscriber queues and a retained ring buffer
//! for replay-from-seq (§5, "a slow subscriber never blocks the operation").
//!
//! **Interaction**: the Scheduler holds one `EventBroker` per operation and
//! calls [`EventBroker::publish`] around every state transition; drivers never
//! publish directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use weft_event::{Event, EventBody, Role, SequenceCounter};

/// A subscriber's view of the broker: a bounded receiver plus the count of
/// events the broker has silently dropped for it on overflow.
pub struct Subscription {
    pub receiver: mpsc::Receiver<Event>,
}

struct Subscriber {
    sender: mpsc::Sender<Event>,
    dropped: AtomicU64,
}

/// Per-operation pub/sub hub. Cheap to clone (wraps `Arc` internals); every
/// clone publishes into and reads from the same retained buffer and subscriber set.
#[derive(Clone)]
pub struct EventBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    sequence: SequenceCounter,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber_id: AtomicU64,
    retained: std::sync::Mutex<VecDeque<Event>>,
    retain_capacity: usize,
    queue_capacity: usize,
}

impl EventBroker {
    /// `queue_capacity` bounds each subscriber's channel; `retain_capacity`
    /// bounds how many past events `subscribe_from` can replay.
    pub fn new(queue_capacity: usize, retain_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                sequence: SequenceCounter::new(),
                subscribers: DashMap::new(),
                next_subscriber_id: AtomicU64::new(1),
                retained: std::sync::Mutex::new(VecDeque::with_capacity(retain_capacity)),
                retain_capacity,
                queue_capacity,
            }),
        }
    }

    /// Assigns a sequence number and timestamp to `body`, retains it, and
    /// fans it out with a non-blocking `try_send` to every live subscriber.
    /// A subscriber whose queue is full gets a single `overflow` marker
    /// instead of blocking the publisher or silently dropping without trace.
    pub fn publish(&self, role: Option<Role>, body: EventBody) -> Event {
        let event = self.inner.sequence.next_event(role, body);
        {
            let mut retained = self.inner.retained.lock().expect("retained buffer poisoned");
            if retained.len() >= self.inner.retain_capacity {
                retained.pop_front();
            }
            retained.push_back(event.clone());
        }
        for entry in self.inner.subscribers.iter() {
            match entry.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = entry.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = entry.sender.try_send(Event {
                        seq: event.seq,
                        timestamp: event.timestamp,
                        role: None,
                        body: EventBody::Overflow { dropped },
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        event
    }

    /// Registers a new subscriber with an empty backlog.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_from(None)
    }

    /// Registers a new subscriber, replaying every retained event with
    /// `seq > from_seq` before live events start arriving. Events older than
    /// the retained window are simply unavailable; callers that need a full
    /// history should restore from a checkpoint first.
    pub fn subscribe_from(&self, from_seq: Option<u64>) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.queue_capacity);
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);

        if let Some(from) = from_seq {
            let retained = self.inner.retained.lock().expect("retained buffer poisoned");
            for event in retained.iter() {
                if event.seq > from {
                    let _ = sender.try_send(event.clone());
                }
            }
        }

        self.inner.subscribers.insert(
            id,
            Subscriber {
                sender,
                dropped: AtomicU64::new(0),
            },
        );
        Subscription { receiver }
    }

    /// Number of events retained for replay right now.
    pub fn retained_len(&self) -> usize {
        self.inner.retained.lock().expect("retained buffer poisoned").len()
    }

    /// The full retained tail, oldest first. Used by the Scheduler to fill in
    /// `OperationCheckpoint::event_tail` (§6.4) without a second copy of the
    /// ring buffer living in the checkpoint path.
    pub fn retained_events(&self) -> Vec<Event> {
        self.inner
            .retained
            .lock()
            .expect("retained buffer poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
