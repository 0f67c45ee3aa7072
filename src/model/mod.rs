// src/model/mod.rs
//! Records exchanged between the engine, its store and its agents
//!
//! - **run**: `Run`, `RunInfo`, `Interrupt`, `RunStatus` and the create/search requests
//! - **message**: the unit an agent produces and the stream manager fans out
//! - **thread**: conversation groupings and agent-side thread state

pub mod message;
pub mod run;
pub mod thread;

pub use message::{ControlSignal, Message, MessageType};
pub use run::{Interrupt, Run, RunConfig, RunCreate, RunInfo, RunSearch, RunStatus};
pub use thread::{Thread, ThreadCreate, ThreadSearch, ThreadState, ThreadStatus, ThreadUpdate, ThreadView};

use chrono::{DateTime, Utc};

/// Allocate a new collision-free identifier
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
