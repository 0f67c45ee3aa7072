// src/runtime/queue.rs
//! Admission queue
//!
//! A single FIFO of run ids shared by every worker. Producers are run
//! submission, resume and failed attempts being retried; consumers are
//! the worker tasks.
//!
//! ```text
//! submit ─┐
//! resume ─┼─► Injector<run_id> ──steal──► Worker 1..N
//! retry  ─┘        │
//!                Notify (wakes one parked worker per push)
//! ```
//!
//! A popped id is owned by exactly one worker, which is what keeps a run
//! from executing twice at once.

use crossbeam::deque::{Injector, Steal};
use metrics::gauge;
use std::pin::pin;
use tokio::sync::Notify;
use tracing::trace;

use crate::observability::ADMISSION_QUEUE_DEPTH;

#[derive(Default)]
pub struct AdmissionQueue {
    items: Injector<String>,
    notify: Notify,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, run_id: impl Into<String>) {
        let run_id = run_id.into();
        trace!("Enqueuing run {}", run_id);
        self.items.push(run_id);
        gauge!(ADMISSION_QUEUE_DEPTH).set(self.items.len() as f64);
        self.notify.notify_one();
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<String> {
        loop {
            match self.items.steal() {
                Steal::Success(run_id) => {
                    gauge!(ADMISSION_QUEUE_DEPTH).set(self.items.len() as f64);
                    return Some(run_id);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Wait for the next run id
    ///
    /// Cancel safe: dropping the future never loses an item, so it can sit
    /// in a `select!` next to a shutdown signal.
    pub async fn pop(&self) -> String {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(run_id) = self.try_pop() {
                return run_id;
            }

            trace!("Admission queue empty, waiting");
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = AdmissionQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().await, "a");
        assert_eq!(queue.pop().await, "b");
        assert_eq!(queue.try_pop().as_deref(), Some("c"));
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(AdmissionQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late");
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped, "late");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_item_popped_once() {
        let queue = Arc::new(AdmissionQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Ok(id) = tokio::time::timeout(Duration::from_millis(100), queue.pop()).await {
                        seen.push(id);
                    }
                    seen
                })
            })
            .collect();

        for i in 0..200 {
            queue.push(format!("run-{}", i));
        }

        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test]
    async fn test_cancelled_pop_loses_nothing() {
        let queue = AdmissionQueue::new();
        assert!(tokio::time::timeout(Duration::from_millis(10), queue.pop()).await.is_err());

        queue.push("kept");
        assert_eq!(queue.pop().await, "kept");
    }
}
