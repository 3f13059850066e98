//! Event Bus - topic-glob pub/sub, generalized from a single flat broadcast
//! channel into per-subscriber buffered `mpsc` channels so a subscriber's
//! pattern filters what it receives instead of every consumer seeing every
//! event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use super::glob::topic_matches;
use super::types::Event;

/// Minimum buffered channel capacity for a subscriber, per the bus
/// contract: a slow consumer can lag without the publisher blocking, up to
/// this many events.
pub const MIN_SUBSCRIBER_CAPACITY: usize = 64;

struct Subscription {
    pattern: String,
    tx: mpsc::Sender<Event>,
}

/// Central publish/subscribe bus. `push` is non-blocking and best-effort:
/// a full subscriber channel drops the event for that subscriber rather
/// than stalling the publisher or other subscribers.
pub struct EventBus {
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to every topic matching `pattern`. Returns a subscriber id
    /// (for `unsubscribe`) and the receiving half of a buffered channel of
    /// at least `MIN_SUBSCRIBER_CAPACITY`.
    pub fn subscribe(&self, pattern: impl Into<String>) -> (u64, mpsc::Receiver<Event>) {
        let pattern = pattern.into();
        let (tx, rx) = mpsc::channel(MIN_SUBSCRIBER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(id, %pattern, "EventBus::subscribe");
        self.subscriptions.lock().unwrap().insert(id, Subscription { pattern, tx });
        (id, rx)
    }

    /// Idempotent: unsubscribing an unknown or already-removed id is a
    /// no-op.
    pub fn unsubscribe(&self, id: u64) {
        self.subscriptions.lock().unwrap().remove(&id);
    }

    /// Publish `event` to every subscriber whose pattern matches its topic.
    /// Non-blocking and best-effort: delivery is at-most-once per
    /// subscriber and a full channel silently drops the event for that
    /// subscriber.
    pub fn push(&self, event: Event) {
        let subscriptions = self.subscriptions.lock().unwrap();
        for subscription in subscriptions.values() {
            if topic_matches(&subscription.pattern, &event.topic) {
                if let Err(e) = subscription.tx.try_send(event.clone()) {
                    debug!(pattern = %subscription.pattern, error = %e, "EventBus::push: dropped event for lagging subscriber");
                }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::EventPayload;

    fn exec_started(exec_id: &str) -> Event {
        Event::new(
            "robot.exec.started",
            EventPayload::ExecStarted { exec_id: exec_id.to_string(), member_id: "m1".to_string() },
        )
    }

    #[tokio::test]
    async fn exact_topic_subscriber_receives_matching_event() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe("robot.exec.started");
        bus.push(exec_started("e1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "robot.exec.started");
    }

    #[tokio::test]
    async fn glob_subscriber_receives_matching_event() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe("robot.exec.*");
        bus.push(exec_started("e1"));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn non_matching_subscriber_receives_nothing() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe("robot.config.*");
        bus.push(exec_started("e1"));
        // give the (non-existent) delivery a chance, then confirm empty
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe("robot.exec.*");
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        bus.push(exec_started("e1"));
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn push_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.push(exec_started("e1"));
    }

    #[tokio::test]
    async fn each_subscriber_gets_its_own_copy() {
        let bus = EventBus::new();
        let (_id1, mut rx1) = bus.subscribe("robot.exec.*");
        let (_id2, mut rx2) = bus.subscribe("robot.exec.*");
        bus.push(exec_started("e1"));
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn full_subscriber_channel_drops_event_without_blocking_others() {
        let bus = EventBus::new();
        let (_id1, rx1) = bus.subscribe("robot.exec.*");
        let (_id2, mut rx2) = bus.subscribe("robot.exec.*");
        // Fill rx1's buffer without draining it.
        for _ in 0..(MIN_SUBSCRIBER_CAPACITY + 5) {
            bus.push(exec_started("e1"));
        }
        // rx2 still received at least MIN_SUBSCRIBER_CAPACITY events; push never panicked.
        let mut count = 0;
        while rx2.try_recv().is_ok() {
            count += 1;
        }
        assert!(count >= MIN_SUBSCRIBER_CAPACITY);
        drop(rx1);
    }
}
