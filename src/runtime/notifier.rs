// src/runtime/notifier.rs
//! Per-run status notifier
//!
//! One [`Notify`] per run id, created lazily. Waiters register interest
//! *before* checking the predicate, so a signal landing between the check
//! and the wait is never lost:
//!
//! ```text
//! waiter:  enable() ─► check status ─► await ◄─┐
//! worker:  persist status ─► notify_waiters() ──┘
//! ```
//!
//! A condition lives only while someone waits on it; the last waiter to
//! leave removes it.

use dashmap::DashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

/// Removes the condition once its last waiter is gone
struct Release<'a> {
    conditions: &'a DashMap<String, Arc<Notify>>,
    run_id: &'a str,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.conditions
            .remove_if(self.run_id, |_, condition| Arc::strong_count(condition) == 1);
    }
}

#[derive(Default)]
pub struct StatusNotifier {
    conditions: DashMap<String, Arc<Notify>>,
}

impl StatusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn condition(&self, run_id: &str) -> Arc<Notify> {
        Arc::clone(
            self.conditions
                .entry(run_id.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .value(),
        )
    }

    /// Wake every current waiter of `run_id`
    ///
    /// Call only after the new status has been persisted.
    pub fn notify(&self, run_id: &str) {
        if let Some(condition) = self.conditions.get(run_id) {
            trace!("Signalling waiters of run {}", run_id);
            condition.notify_waiters();
        }
    }

    /// Wait until `ready` returns true, or until `timeout` elapses
    ///
    /// `ready` is re-evaluated after every wakeup and once more when the
    /// deadline passes. Returns the final evaluation.
    pub async fn wait_until<F>(&self, run_id: &str, timeout: Option<Duration>, mut ready: F) -> bool
    where
        F: FnMut() -> bool,
    {
        // Declared first so it drops after `condition`
        let _release = Release {
            conditions: &self.conditions,
            run_id,
        };
        let condition = self.condition(run_id);
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let mut notified = pin!(condition.notified());
            notified.as_mut().enable();

            if ready() {
                return true;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return ready();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Drop the condition of a deleted run
    pub fn forget(&self, run_id: &str) {
        self.conditions.remove(run_id);
    }

    /// Runs that currently have waiters
    pub fn tracked(&self) -> usize {
        self.conditions.len()
    }
}
