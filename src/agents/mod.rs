// src/agents/mod.rs
//! Agent capability and registry
//!
//! The engine only ever talks to agents through [`Agent`]. Which agents
//! exist is decided once, at startup, by whoever builds the
//! [`AgentRegistry`]: either from configuration (`[[agents]]` entries,
//! built-in kinds) or by registering external adapters explicitly.

pub mod agent;
pub mod builtin;
pub mod registry;

pub use agent::{Agent, MessageStream};
pub use builtin::{AgentConfig, AgentKind, EchoAgent, ScriptedAgent, ECHO_INTERRUPT_EVENT};
pub use registry::{AgentDescriptor, AgentEntry, AgentRegistry, InterruptSpec};
