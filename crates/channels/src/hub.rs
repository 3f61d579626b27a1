//! RouteHub — topic-keyed in-process pub/sub.
//!
//! Topics are route keys (normally a bot id). Publishing is non-blocking:
//! a full subscriber buffer drops that subscriber's copy of the event,
//! never the publisher. The topic map is guarded by a `RwLock`; publishes
//! take the read side, subscribe/cancel the write side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bh_domain::stream::StreamEvent;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default per-subscriber buffer.
pub const HUB_BUFFER: usize = 32;

struct SubscriberEntry {
    stream_id: Uuid,
    tx: mpsc::Sender<StreamEvent>,
}

type Topics = RwLock<HashMap<String, Vec<SubscriberEntry>>>;

pub struct RouteHub {
    topics: Arc<Topics>,
}

impl Default for RouteHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteHub {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new subscriber on a route key.
    pub fn subscribe(&self, route: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(HUB_BUFFER);
        let stream_id = Uuid::new_v4();
        self.topics
            .write()
            .entry(route.to_string())
            .or_default()
            .push(SubscriberEntry { stream_id, tx });
        tracing::debug!(route, %stream_id, "hub subscriber added");
        Subscription {
            stream_id,
            rx,
            topics: Arc::downgrade(&self.topics),
            route: route.to_string(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Shorthand: publish a terminal `final` event carrying `text`.
    pub fn publish(&self, route: &str, text: &str) {
        self.publish_event(route, StreamEvent::final_text(text));
    }

    /// Non-blocking broadcast. Slow subscribers lose this event; closed
    /// subscribers are pruned.
    pub fn publish_event(&self, route: &str, event: StreamEvent) {
        let mut closed: Vec<Uuid> = Vec::new();
        {
            let topics = self.topics.read();
            let Some(subscribers) = topics.get(route) else {
                return;
            };
            for sub in subscribers {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(route, stream_id = %sub.stream_id, "hub buffer full, event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(sub.stream_id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            let mut topics = self.topics.write();
            if let Some(subscribers) = topics.get_mut(route) {
                subscribers.retain(|s| !closed.contains(&s.stream_id));
                if subscribers.is_empty() {
                    topics.remove(route);
                }
            }
        }
    }

    pub fn subscriber_count(&self, route: &str) -> usize {
        self.topics.read().get(route).map_or(0, Vec::len)
    }
}

fn remove_subscriber(topics: &Topics, route: &str, stream_id: Uuid) {
    let mut topics = topics.write();
    if let Some(subscribers) = topics.get_mut(route) {
        subscribers.retain(|s| s.stream_id != stream_id);
        if subscribers.is_empty() {
            topics.remove(route);
        }
    }
}

/// A live hub subscription.
///
/// `cancel` is idempotent: the first call detaches the sender, which
/// closes `rx` exactly once. A subscription dropped without cancelling is
/// pruned lazily on the next publish to its route.
pub struct Subscription {
    pub stream_id: Uuid,
    pub rx: mpsc::Receiver<StreamEvent>,
    topics: Weak<Topics>,
    route: String,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(topics) = self.topics.upgrade() {
            remove_subscriber(&topics, &self.route, self.stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_domain::stream::EventBody;

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let hub = Arc::new(RouteHub::new());
        let mut sub = hub.subscribe("b1");

        for i in 0..5 {
            hub.publish_event("b1", StreamEvent::delta(format!("d{i}")));
        }

        for i in 0..5 {
            let ev = sub.rx.recv().await.unwrap();
            match ev.body {
                EventBody::TextDelta { delta } => assert_eq!(delta, format!("d{i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_is_shorthand_for_final() {
        let hub = Arc::new(RouteHub::new());
        let mut sub = hub.subscribe("b1");
        hub.publish("b1", "done");

        let ev = sub.rx.recv().await.unwrap();
        assert!(matches!(ev.body, EventBody::Final { content } if content == "done"));
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking() {
        let hub = Arc::new(RouteHub::new());
        let mut sub = hub.subscribe("b1");

        // Overfill: HUB_BUFFER fit, the rest dropped.
        for i in 0..(HUB_BUFFER + 10) {
            hub.publish_event("b1", StreamEvent::delta(format!("{i}")));
        }

        let mut received = 0;
        while let Ok(ev) = sub.rx.try_recv() {
            // Delivery stays FIFO over the survivors.
            assert!(matches!(
                ev.body,
                EventBody::TextDelta { ref delta } if delta == &received.to_string()
            ));
            received += 1;
        }
        assert_eq!(received, HUB_BUFFER);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_closes_receiver() {
        let hub = Arc::new(RouteHub::new());
        let mut sub = hub.subscribe("b1");
        assert_eq!(hub.subscriber_count("b1"), 1);

        sub.cancel();
        sub.cancel(); // double-cancel is safe
        assert_eq!(hub.subscriber_count("b1"), 0);

        hub.publish("b1", "late");
        assert!(sub.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_publish() {
        let hub = Arc::new(RouteHub::new());
        {
            let _sub = hub.subscribe("b1");
            assert_eq!(hub.subscriber_count("b1"), 1);
        }
        // Entry lingers until a publish notices the closed receiver.
        hub.publish("b1", "x");
        assert_eq!(hub.subscriber_count("b1"), 0);
    }

    #[tokio::test]
    async fn routes_are_isolated() {
        let hub = Arc::new(RouteHub::new());
        let mut a = hub.subscribe("bot-a");
        let mut b = hub.subscribe("bot-b");

        hub.publish("bot-a", "only a");

        assert!(a.rx.try_recv().is_ok());
        assert!(b.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_receiver_sees_end_of_stream() {
        let hub = Arc::new(RouteHub::new());
        let mut sub = hub.subscribe("b1");
        sub.cancel();
        // The sender side is gone; recv drains to None, never blocks.
        assert!(sub.rx.recv().await.is_none());
    }
}
