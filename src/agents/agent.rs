// src/agents/agent.rs
//! The agent capability
//!
//! An agent turns a [`Run`] into a lazy, finite, non-restartable sequence
//! of [`Message`]s. The engine never inspects the agent beyond this trait;
//! adapters for specific workflow engines implement it.
//!
//! # Resume protocol
//!
//! When `run.interrupt` carries `user_data`, the agent must continue from
//! its paused point using that value instead of starting again from
//! `run.input`. [`Run::resume_value`] exposes it.

use crate::model::{Message, Run, ThreadState};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Message sequence produced for one execution attempt
pub type MessageStream = BoxStream<'static, Result<Message>>;

#[async_trait]
pub trait Agent: Send + Sync {
    /// Start (or resume) the run and stream its messages
    ///
    /// The last message carries the run's final result. An `interrupt`
    /// message pauses the run; the engine stops consuming after it.
    fn astream(&self, run: Run) -> MessageStream;

    /// Current state snapshot of a thread, `None` when it has no state yet
    async fn get_agent_state(&self, _thread_id: &str) -> Result<Option<ThreadState>> {
        Err(EngineError::ThreadsNotSupported)
    }

    /// Past states of a thread, newest first
    async fn get_history(
        &self,
        _thread_id: &str,
        _limit: Option<usize>,
        _before: Option<String>,
    ) -> Result<Vec<ThreadState>> {
        Err(EngineError::ThreadsNotSupported)
    }

    /// Overwrite the thread's state
    async fn update_agent_state(&self, _thread_id: &str, _state: ThreadState) -> Result<Option<ThreadState>> {
        Err(EngineError::ThreadsNotSupported)
    }
}
