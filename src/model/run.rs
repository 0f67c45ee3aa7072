// src/model/run.rs
//! Run records and run statistics
//!
//! A [`Run`] is the user-visible execution record; [`RunInfo`] holds the
//! worker-side statistics kept alongside it.
//!
//! # Status machine
//!
//! ```text
//!            ┌──────────── re-enqueue (attempts < ceiling) ───────┐
//!            ▼                                                    │
//!  submit → pending ──► success                                   │
//!            │   ▲                                                │
//!            │   └──── resume ──── interrupted ◄──┐               │
//!            │                                    │               │
//!            ├────────────────────────────────────┘               │
//!            └──────────────► error ──────────────────────────────┘
//! ```
//!
//! `pending` covers both "queued" and "executing"; only
//! [`RunInfo::started_at`] tells them apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued or executing
    Pending,
    Success,
    Error,
    /// Never persisted; returned to a caller whose bounded wait expired
    Timeout,
    /// Paused awaiting a resume payload
    Interrupted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Timeout => "timeout",
            RunStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RunStatus::Pending)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run configuration handed through to the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    /// Step limit for graph-style agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurable: Option<Map<String, Value>>,
}

/// A pause point raised by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    /// Tag emitted by the agent alongside the interrupt
    pub event: Option<String>,

    /// Declared interrupt type
    pub name: Option<String>,

    /// Payload the agent produced when pausing
    pub ai_data: Value,

    /// Payload supplied by resume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Value>,
}

impl Interrupt {
    /// Whether a resume payload is attached
    pub fn is_answered(&self) -> bool {
        self.user_data.is_some()
    }
}

/// Request to create a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCreate {
    pub agent_id: String,

    /// Explicit thread; a fresh one is allocated when absent
    #[serde(default)]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub input: Option<Value>,

    #[serde(default)]
    pub config: Option<RunConfig>,

    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl RunCreate {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// A single execution request/record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub agent_id: String,
    pub thread_id: String,
    pub input: Option<Value>,
    pub config: Option<RunConfig>,
    pub metadata: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,

    #[serde(default)]
    pub interrupt: Option<Interrupt>,
}

impl Run {
    /// Build a pending run from a create request
    pub fn from_create(create: RunCreate, thread_id: String) -> Self {
        let now = super::now();

        Self {
            run_id: super::new_id(),
            agent_id: create.agent_id,
            thread_id,
            input: create.input,
            config: create.config,
            metadata: create.metadata,
            created_at: now,
            updated_at: now,
            status: RunStatus::Pending,
            interrupt: None,
        }
    }

    /// Resume payload to hand to the agent, if this execution continues a pause
    pub fn resume_value(&self) -> Option<&Value> {
        self.interrupt.as_ref().and_then(|i| i.user_data.as_ref())
    }
}

/// Execution statistics, one per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,

    /// Worker dequeues so far
    pub attempts: u32,

    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Seconds between start and end of the last attempt
    pub exec_s: Option<f64>,

    /// Seconds between queueing and start of the last attempt
    pub queue_s: Option<f64>,
}

impl RunInfo {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            attempts: 0,
            queued_at: super::now(),
            started_at: None,
            ended_at: None,
            exec_s: None,
            queue_s: None,
        }
    }

    /// Stamp a dequeue: bumps `attempts` and records `started_at`
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.attempts += 1;
        self.started_at = Some(at);
        self.ended_at = None;
        self.exec_s = Some(0.0);
    }

    /// Stamp the end of an attempt and derive the timings
    pub fn mark_ended(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
        if let Some(started) = self.started_at {
            self.exec_s = Some(seconds_between(started, at));
            self.queue_s = Some(seconds_between(self.queued_at, started));
        }
    }

    /// Reset for a resume cycle
    pub fn requeue(&mut self, at: DateTime<Utc>) {
        self.attempts = 0;
        self.queued_at = at;
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
}

/// Exact-match run filters with pagination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSearch {
    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default)]
    pub status: Option<RunStatus>,

    #[serde(default)]
    pub thread_id: Option<String>,

    /// Every listed key must be present in the run's metadata with an equal value
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,

    #[serde(default)]
    pub offset: usize,

    #[serde(default)]
    pub limit: Option<usize>,
}

impl RunSearch {
    pub fn matches(&self, run: &Run) -> bool {
        if let Some(agent_id) = &self.agent_id {
            if &run.agent_id != agent_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if run.status != status {
                return false;
            }
        }
        if let Some(thread_id) = &self.thread_id {
            if &run.thread_id != thread_id {
                return false;
            }
        }
        if let Some(wanted) = &self.metadata {
            let Some(actual) = &run.metadata else {
                return wanted.is_empty();
            };
            return wanted.iter().all(|(k, v)| actual.get(k) == Some(v));
        }
        true
    }
}
