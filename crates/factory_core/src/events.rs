//! Bounded publish/subscribe event bus.
//!
//! The queue is a plain bounded ring drained once per tick. Overflowing
//! publishes drop the event and bump a counter; once cumulative drops exceed
//! the configured fraction of capacity the bus reports a fatal overflow.
//! The subscriber list is behind its own lock: the drain phase snapshots it,
//! releases the lock, then dispatches — subscriptions changed during
//! dispatch take effect the next tick.

use crate::{EventEnvelope, EventKind, SimulationError};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscriber: String,
    pub kinds: HashSet<EventKind>,
}

#[derive(Debug)]
pub struct EventBus {
    queue: VecDeque<EventEnvelope>,
    capacity: usize,
    history: VecDeque<EventEnvelope>,
    history_capacity: usize,
    dropped: u64,
    published: u64,
    fatal_drop_fraction: f64,
    subscribers: Mutex<Vec<Subscription>>,
}

impl EventBus {
    pub fn new(capacity: usize, history_capacity: usize, fatal_drop_fraction: f64) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            history: VecDeque::with_capacity(history_capacity.min(1024)),
            history_capacity,
            dropped: 0,
            published: 0,
            fatal_drop_fraction,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Non-blocking enqueue. Returns false when the event was dropped.
    pub fn publish(&mut self, envelope: EventEnvelope) -> bool {
        if self.queue.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.published += 1;
        self.queue.push_back(envelope);
        true
    }

    /// Fatal once drops exceed the configured fraction of queue capacity.
    pub fn check_overflow(&self) -> Result<(), SimulationError> {
        #[allow(clippy::cast_precision_loss)]
        let threshold = self.fatal_drop_fraction * self.capacity as f64;
        #[allow(clippy::cast_precision_loss)]
        if self.dropped as f64 > threshold {
            return Err(SimulationError::EventQueueOverflow {
                dropped: self.dropped,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Drain every queued event, appending to the bounded history.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        let drained: Vec<EventEnvelope> = self.queue.drain(..).collect();
        for envelope in &drained {
            if self.history.len() >= self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(envelope.clone());
        }
        drained
    }

    pub fn subscribe(&self, subscriber: impl Into<String>, kinds: impl IntoIterator<Item = EventKind>) {
        self.subscribers.lock().push(Subscription {
            subscriber: subscriber.into(),
            kinds: kinds.into_iter().collect(),
        });
    }

    pub fn unsubscribe(&self, subscriber: &str) {
        self.subscribers.lock().retain(|s| s.subscriber != subscriber);
    }

    /// Copy of the subscriber list taken under the lock; dispatch happens
    /// against this snapshot with the lock released.
    pub fn snapshot_subscriptions(&self) -> Vec<Subscription> {
        self.subscribers.lock().clone()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn history(&self) -> &VecDeque<EventEnvelope> {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, EventId, ResourceId, TaskId};

    fn envelope(n: u64) -> EventEnvelope {
        EventEnvelope {
            id: EventId(format!("evt_{n:08}")),
            tick: n,
            time_hours: 0.0,
            event: Event::ResourceProduced {
                resource: ResourceId(0),
                quantity: 1.0,
                task_id: TaskId("task_00000_x".to_string()),
            },
        }
    }

    #[test]
    fn publish_then_drain_returns_events_in_order() {
        let mut bus = EventBus::new(10, 10, 0.1);
        for n in 0..3 {
            assert!(bus.publish(envelope(n)));
        }
        let drained = bus.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].tick, 0);
        assert_eq!(drained[2].tick, 2);
        assert_eq!(bus.queued(), 0);
    }

    #[test]
    fn overflow_drops_and_counts() {
        let mut bus = EventBus::new(2, 10, 0.5);
        assert!(bus.publish(envelope(0)));
        assert!(bus.publish(envelope(1)));
        assert!(!bus.publish(envelope(2)), "third publish must be dropped");
        assert_eq!(bus.dropped(), 1);
    }

    #[test]
    fn drops_above_fraction_are_fatal() {
        let mut bus = EventBus::new(10, 10, 0.1);
        for n in 0..10 {
            bus.publish(envelope(n));
        }
        // 10% of capacity 10 = 1 drop tolerated; the second is fatal.
        bus.publish(envelope(10));
        assert!(bus.check_overflow().is_ok());
        bus.publish(envelope(11));
        assert!(matches!(
            bus.check_overflow(),
            Err(SimulationError::EventQueueOverflow { dropped: 2, .. })
        ));
    }

    #[test]
    fn history_is_bounded_to_most_recent() {
        let mut bus = EventBus::new(100, 3, 0.1);
        for n in 0..5 {
            bus.publish(envelope(n));
        }
        bus.drain();
        assert_eq!(bus.history().len(), 3);
        assert_eq!(bus.history().front().unwrap().tick, 2);
        assert_eq!(bus.history().back().unwrap().tick, 4);
    }

    #[test]
    fn subscription_snapshot_ignores_later_changes() {
        let bus = EventBus::new(10, 10, 0.1);
        bus.subscribe("thermal", [EventKind::TaskStarted]);
        let snapshot = bus.snapshot_subscriptions();
        bus.subscribe("transport", [EventKind::TaskCompleted]);
        assert_eq!(snapshot.len(), 1, "snapshot taken before the change");
        assert_eq!(bus.snapshot_subscriptions().len(), 2);
    }

    #[test]
    fn unsubscribe_removes_by_name() {
        let bus = EventBus::new(10, 10, 0.1);
        bus.subscribe("thermal", [EventKind::TaskStarted]);
        bus.subscribe("waste", [EventKind::WasteGenerated]);
        bus.unsubscribe("thermal");
        let subs = bus.snapshot_subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].subscriber, "waste");
    }
}
