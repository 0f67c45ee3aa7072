// src/model/thread.rs
//! Threads group runs that share agent-side state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Thread status, derived from the status of its latest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Idle,
    Busy,
    Interrupted,
    Error,
}

impl From<super::RunStatus> for ThreadStatus {
    fn from(status: super::RunStatus) -> Self {
        use super::RunStatus;
        match status {
            RunStatus::Pending => ThreadStatus::Busy,
            RunStatus::Success | RunStatus::Timeout => ThreadStatus::Idle,
            RunStatus::Interrupted => ThreadStatus::Interrupted,
            RunStatus::Error => ThreadStatus::Error,
        }
    }
}

/// Thread record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub metadata: Option<Map<String, Value>>,
    pub status: ThreadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(thread_id: String, metadata: Option<Map<String, Value>>) -> Self {
        let now = super::now();
        Self {
            thread_id,
            metadata,
            status: ThreadStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Thread plus the agent's current values for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub values: Option<Value>,
}

/// Agent-side state snapshot for a thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    #[serde(default)]
    pub checkpoint_id: Option<String>,
    pub values: Value,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadCreate {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadUpdate {
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,

    /// New agent-side values; applied before metadata
    #[serde(default)]
    pub values: Option<Value>,

    #[serde(default)]
    pub checkpoint_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadSearch {
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub status: Option<ThreadStatus>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ThreadSearch {
    pub fn matches(&self, thread: &Thread) -> bool {
        if let Some(status) = self.status {
            if thread.status != status {
                return false;
            }
        }
        match (&self.metadata, &thread.metadata) {
            (Some(wanted), Some(actual)) => wanted.iter().all(|(k, v)| actual.get(k) == Some(v)),
            (Some(wanted), None) => wanted.is_empty(),
            (None, _) => true,
        }
    }
}
