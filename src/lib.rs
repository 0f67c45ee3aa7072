// src/lib.rs
//! Agent Run Engine Library
//!
//! Runs third-party agent workflows behind a uniform run lifecycle:
//! submit a run, poll it, stream its messages, block until its output, or
//! resume it after it pauses for input.
//!
//! # Architecture
//!
//! - **model**: runs, run statistics, messages, threads
//! - **storage**: run store contract, in-memory store, snapshots
//! - **agents**: the agent capability, registry, built-in agents
//! - **validation**: schema checks on inputs, outputs and resume payloads
//! - **runtime**: admission queue, worker pool, stream fan-out, status notifier
//! - **engine**: the explicitly constructed owner of all of the above
//! - **threads**: thread records and the thread-state surface
//! - **observability**: tracing and metrics setup
//! - **utils**: errors and configuration

pub mod agents;
pub mod engine;
pub mod model;
pub mod observability;
pub mod runtime;
pub mod storage;
pub mod threads;
pub mod utils;
pub mod validation;

pub use agents::{Agent, AgentConfig, AgentDescriptor, AgentRegistry, MessageStream};
pub use engine::{Engine, RunEvent};
pub use model::{Message, Run, RunCreate, RunStatus};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
