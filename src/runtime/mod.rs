// src/runtime/mod.rs
//! Run execution runtime
//!
//! - **Admission Queue**: FIFO of run ids shared by all workers
//! - **Worker Pool**: N tasks driving runs through the agent, with bounded retry
//! - **Stream Manager**: per-run fan-out of messages to live subscribers
//! - **Status Notifier**: per-run wakeups for blocking waiters
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  submit / resume / retry                                 │
//! │          │                                               │
//! │          ▼                                               │
//! │   AdmissionQueue ──pop──► Worker 1..N ──astream──► Agent │
//! │                              │                           │
//! │              ┌───────────────┼───────────────┐           │
//! │              ▼               ▼               ▼           │
//! │          RunStore     StreamManager   StatusNotifier     │
//! │       (status/output)  (join, events) (await_output)     │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod notifier;
pub mod queue;
pub mod stream;
pub mod worker_pool;

pub use notifier::StatusNotifier;
pub use queue::AdmissionQueue;
pub use stream::{StreamManager, Subscription};
pub use worker_pool::{execute_run, WorkerContext, WorkerPool};
