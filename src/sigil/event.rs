//! Orchestrator event bus.
//!
//! A bounded broadcast channel carrying [`OrchestrationEvent`]s emitted as tasks move through
//! the lead/reviewer/consensus pipeline. Subscribers that fall behind lose the oldest events
//! rather than block the publisher; the number lost is tracked in an explicit counter so
//! operators can tell whether a slow consumer is missing events, which `tokio::sync::broadcast`
//! otherwise only signals to the lagging receiver itself via `RecvError::Lagged`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity. Chosen to absorb a full orchestration round (lead + a handful of
/// reviewers) without dropping, while staying small enough that a permanently-unsubscribed
/// bus doesn't grow unbounded.
const DEFAULT_CAPACITY: usize = 1024;

/// A lifecycle event published by an [`crate::orchestrator::Orchestrator`] run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    TaskStarted {
        task_id: Uuid,
    },
    LeadSelected {
        task_id: Uuid,
        agent_id: String,
    },
    ProposalReceived {
        task_id: Uuid,
        agent_id: String,
    },
    ReviewerSelected {
        task_id: Uuid,
        agent_id: String,
    },
    ReviewReceived {
        task_id: Uuid,
        agent_id: String,
        approved: bool,
    },
    ConsensusReached {
        task_id: Uuid,
        approved: bool,
    },
    ConflictDetected {
        task_id: Uuid,
        weight_fraction: f64,
    },
    TaskCompleted {
        task_id: Uuid,
        approved: bool,
    },
    TaskFailed {
        task_id: Uuid,
        reason: String,
    },
}

/// A published event, stamped with a monotonic sequence number and wall-clock time.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: OrchestrationEvent,
}

/// Bounded publish/subscribe bus for orchestration events.
///
/// Cloning an `EventBus` shares the same underlying channel and counters (it wraps `Arc`
/// internals), the same shared-handle idiom used by [`crate::orchestrator::Orchestrator`].
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
    seq: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event. Never blocks; if there are no subscribers the event is simply
    /// discarded (matching `broadcast::Sender::send`'s semantics).
    pub fn publish(&self, event: OrchestrationEvent) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let bus_event = BusEvent {
            seq,
            at: Utc::now(),
            event,
        };
        // send() only errs when there are zero receivers; that is not an overflow and is not
        // counted as dropped.
        let _ = self.sender.send(bus_event);
    }

    /// Subscribe to the bus. The returned receiver independently tracks how far behind it has
    /// fallen; callers that want to observe gaps should call [`EventBus::recv`] rather than
    /// the raw `broadcast::Receiver::recv`, so lag is folded into [`EventBus::dropped_count`].
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            dropped: self.dropped.clone(),
        }
    }

    /// Total events dropped across all subscriptions due to slow consumers, since bus creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle returned by [`EventBus::subscribe`].
pub struct EventSubscription {
    receiver: broadcast::Receiver<BusEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Receive the next event, folding any observed lag into the bus's dropped-event counter.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::SeqCst);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let task_id = Uuid::new_v4();
        bus.publish(OrchestrationEvent::TaskStarted { task_id });

        let received = sub.recv().await.expect("event");
        match received.event {
            OrchestrationEvent::TaskStarted { task_id: got } => assert_eq!(got, task_id),
            _ => panic!("wrong event"),
        }
    }

    #[tokio::test]
    async fn overflow_is_counted() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe();
        let task_id = Uuid::new_v4();
        for _ in 0..5 {
            bus.publish(OrchestrationEvent::TaskStarted { task_id });
        }
        // drain; the lag should have been recorded before we catch up
        while sub.recv().await.is_some() {
            if bus.dropped_count() > 0 {
                break;
            }
        }
        assert!(bus.dropped_count() > 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(OrchestrationEvent::TaskStarted {
            task_id: Uuid::new_v4(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
