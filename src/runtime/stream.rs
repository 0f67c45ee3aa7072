// src/runtime/stream.rs
//! Per-run publish/subscribe fan-out
//!
//! ```text
//!                       ┌─► Subscription (worker bookkeeping)
//! worker ──publish──► run_id ─┼─► Subscription (join #1)
//!                       └─► Subscription (join #2)
//! ```
//!
//! Publishing pushes to whoever is subscribed at that instant. Nothing is
//! buffered for later subscribers, so anyone who wants the whole stream
//! must subscribe before the first message is published.

use crate::model::Message;
use crate::observability::STREAM_SUBSCRIBERS;
use dashmap::DashMap;
use metrics::gauge;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Subscribers = DashMap<String, Vec<(u64, mpsc::UnboundedSender<Message>)>>;

#[derive(Default)]
struct Inner {
    subscribers: Subscribers,
    next_id: AtomicU64,
    total: AtomicU64,
}

/// Fan-out table keyed by run id
#[derive(Clone, Default)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

/// One subscriber queue; unregisters itself when dropped
pub struct Subscription {
    run_id: String,
    id: u64,
    receiver: mpsc::UnboundedReceiver<Message>,
    manager: StreamManager,
}

impl Subscription {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Next published message; `None` once the manager has dropped this queue
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Queued message, if any, without waiting
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.manager.unsubscribe(&self.run_id, self.id);
    }
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new unbounded queue under `run_id`
    pub fn subscribe(&self, run_id: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inner
            .subscribers
            .entry(run_id.to_string())
            .or_default()
            .push((id, sender));
        self.record_total(1);

        debug!("Subscriber {} attached to run {}", id, run_id);
        Subscription {
            run_id: run_id.to_string(),
            id,
            receiver,
            manager: self.clone(),
        }
    }

    /// Push `message` to every current subscriber of `run_id`
    ///
    /// Returns the number of queues that received it.
    pub fn publish(&self, run_id: &str, message: &Message) -> usize {
        let Some(mut queues) = self.inner.subscribers.get_mut(run_id) else {
            warn!("No subscribers for run {}, message dropped", run_id);
            return 0;
        };

        let before = queues.len();
        queues.retain(|(_, sender)| sender.send(message.clone()).is_ok());
        let delivered = queues.len();
        let empty = queues.is_empty();
        drop(queues);

        if delivered < before {
            self.record_total(-((before - delivered) as i64));
        }
        if empty {
            self.inner.subscribers.remove_if(run_id, |_, queues| queues.is_empty());
            warn!("No subscribers for run {}, message dropped", run_id);
        }
        delivered
    }

    pub fn subscriber_count(&self, run_id: &str) -> usize {
        self.inner.subscribers.get(run_id).map_or(0, |q| q.len())
    }

    fn unsubscribe(&self, run_id: &str, id: u64) {
        let mut removed = false;
        if let Some(mut queues) = self.inner.subscribers.get_mut(run_id) {
            let before = queues.len();
            queues.retain(|(sub_id, _)| *sub_id != id);
            removed = queues.len() < before;
        }
        self.inner.subscribers.remove_if(run_id, |_, queues| queues.is_empty());

        if removed {
            self.record_total(-1);
            debug!("Subscriber {} detached from run {}", id, run_id);
        }
    }

    fn record_total(&self, delta: i64) {
        let total = if delta >= 0 {
            self.inner.total.fetch_add(delta as u64, Ordering::Relaxed) + delta as u64
        } else {
            let dec = delta.unsigned_abs();
            self.inner.total.fetch_sub(dec, Ordering::Relaxed).saturating_sub(dec)
        };
        gauge!(STREAM_SUBSCRIBERS).set(total as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControlSignal;
    use serde_json::json;

    #[tokio::test]
    async fn test_fan_out_in_order() {
        let streams = StreamManager::new();
        let mut subs: Vec<_> = (0..3).map(|_| streams.subscribe("r1")).collect();

        for i in 0..5 {
            assert_eq!(streams.publish("r1", &Message::message(json!(i))), 3);
        }
        streams.publish("r1", &Message::control(ControlSignal::Done));

        for sub in subs.iter_mut() {
            for i in 0..5 {
                assert_eq!(sub.recv().await.unwrap().data, json!(i));
            }
            assert!(sub.recv().await.unwrap().is_done());
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let streams = StreamManager::new();
        assert_eq!(streams.publish("nobody", &Message::message(json!(1))), 0);
    }

    #[test]
    fn test_late_subscriber_misses_history() {
        let streams = StreamManager::new();
        let _early = streams.subscribe("r1");
        streams.publish("r1", &Message::message(json!("first")));

        let mut late = streams.subscribe("r1");
        streams.publish("r1", &Message::message(json!("second")));
        assert_eq!(late.try_recv().unwrap().data, json!("second"));
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let streams = StreamManager::new();
        let a = streams.subscribe("r1");
        let b = streams.subscribe("r1");
        assert_eq!(streams.subscriber_count("r1"), 2);

        drop(a);
        assert_eq!(streams.subscriber_count("r1"), 1);
        drop(b);
        assert_eq!(streams.subscriber_count("r1"), 0);
        assert_eq!(streams.publish("r1", &Message::message(json!(1))), 0);
    }

    #[test]
    fn test_runs_are_isolated() {
        let streams = StreamManager::new();
        let mut one = streams.subscribe("r1");
        let mut two = streams.subscribe("r2");

        streams.publish("r1", &Message::message(json!("for r1")));
        assert_eq!(one.try_recv().unwrap().data, json!("for r1"));
        assert!(two.try_recv().is_none());
        assert_eq!(two.run_id(), "r2");
    }
}
