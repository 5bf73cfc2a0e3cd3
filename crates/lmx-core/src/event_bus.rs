//! C5 — `EventBus`: in-process publish/subscribe fabric for the admin SSE
//! endpoint.
//!
//! Subscribers hold only a receiving queue; the bus holds the sending half
//! of each subscriber's queue in its subscriber set. On overflow the bus
//! drops the offending subscriber from that set — the subscriber task then
//! observes its channel close and exits on its own. No cyclic ownership.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lmx_types::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

const DEFAULT_SUBSCRIBER_QUEUE: usize = 100;
const DEFAULT_MAX_SUBSCRIBERS: usize = 50;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ServerEvent>,
}

/// A read handle returned to admin SSE clients; wraps the receiving half of
/// a bounded channel.
pub struct Subscription {
    pub rx: mpsc::Receiver<ServerEvent>,
}

#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
    max_subscribers: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_SUBSCRIBER_QUEUE, DEFAULT_MAX_SUBSCRIBERS)
    }

    pub fn with_limits(queue_capacity: usize, max_subscribers: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            queue_capacity,
            max_subscribers,
        }
    }

    /// Subscribe to the bus. Returns `None` if the subscriber cap is
    /// already reached.
    pub async fn subscribe(&self) -> Option<Subscription> {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.len() >= self.max_subscribers {
            warn!(
                max_subscribers = self.max_subscribers,
                "event bus subscriber cap reached; rejecting new subscription"
            );
            return None;
        }
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers.push(Subscriber { id, tx });
        Some(Subscription { rx })
    }

    /// Publish an event to every current subscriber. Iterates a snapshot of
    /// the subscriber set, so mutation (eviction) during iteration is safe.
    /// A subscriber whose queue is full is evicted in finite time; other
    /// subscribers are unaffected.
    pub async fn publish(&self, event: ServerEvent) {
        let snapshot: Vec<Subscriber> = {
            let guard = self.subscribers.read().await;
            guard
                .iter()
                .map(|s| Subscriber {
                    id: s.id,
                    tx: s.tx.clone(),
                })
                .collect()
        };

        let mut dead_ids = Vec::new();
        for subscriber in &snapshot {
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => dead_ids.push(subscriber.id),
                Err(mpsc::error::TrySendError::Closed(_)) => dead_ids.push(subscriber.id),
            }
        }

        if !dead_ids.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            subscribers.retain(|s| !dead_ids.contains(&s.id));
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
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
    use std::collections::HashMap;

    fn event(n: u32) -> ServerEvent {
        let mut data = HashMap::new();
        data.insert("n".to_string(), serde_json::json!(n));
        ServerEvent::new("test_event", data)
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_evicted_others_unaffected() {
        let bus = EventBus::with_limits(1, 10);
        let mut slow = bus.subscribe().await.unwrap();
        let mut fast = bus.subscribe().await.unwrap();

        // Fill the slow subscriber's single-slot queue without draining it.
        bus.publish(event(1)).await;
        assert_eq!(bus.subscriber_count().await, 2);

        // Second publish overflows the slow subscriber's queue; it is evicted.
        bus.publish(event(2)).await;
        assert_eq!(bus.subscriber_count().await, 1);

        // The fast subscriber still received both events before eviction logic ran.
        assert!(fast.rx.try_recv().is_ok());
        assert!(fast.rx.try_recv().is_ok());
        drop(slow.rx.try_recv());
    }

    #[tokio::test]
    async fn subscriber_cap_is_enforced() {
        let bus = EventBus::with_limits(10, 1);
        let _first = bus.subscribe().await.unwrap();
        assert!(bus.subscribe().await.is_none());
    }
}
