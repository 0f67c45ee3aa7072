// src/agents/registry.rs
//! Agent registry
//!
//! Explicitly constructed table of the agents an engine can run, in
//! registration order. The first registered agent is the default used by
//! the thread-state surface.

use crate::agents::agent::Agent;
use crate::utils::errors::{EngineError, Result};
use crate::validation::AgentSchemas;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Declared interrupt type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptSpec {
    pub interrupt_type: String,

    /// Schema of the payload the agent emits when pausing
    #[serde(default)]
    pub interrupt_payload: Option<Value>,

    /// Schema the resume payload must satisfy
    #[serde(default)]
    pub resume_payload: Option<Value>,
}

/// Static description of an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub input_schema: Option<Value>,

    #[serde(default)]
    pub output_schema: Option<Value>,

    /// Schema for `config.configurable`
    #[serde(default)]
    pub config_schema: Option<Value>,

    #[serde(default)]
    pub interrupts: Vec<InterruptSpec>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_interrupt(mut self, spec: InterruptSpec) -> Self {
        self.interrupts.push(spec);
        self
    }

    pub fn interrupt(&self, interrupt_type: &str) -> Option<&InterruptSpec> {
        self.interrupts.iter().find(|i| i.interrupt_type == interrupt_type)
    }
}

/// A registered agent
#[derive(Clone)]
pub struct AgentEntry {
    pub id: String,
    pub descriptor: Arc<AgentDescriptor>,

    /// The descriptor's schemas, compiled at registration
    pub schemas: Arc<AgentSchemas>,
    pub agent: Arc<dyn Agent>,
}

impl fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentEntry")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    entries: RwLock<Vec<AgentEntry>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under `agent_id`; ids are unique
    ///
    /// Fails with `InvalidInput` when the id is taken or a declared schema
    /// does not compile.
    pub fn register(
        &self,
        agent_id: impl Into<String>,
        descriptor: AgentDescriptor,
        agent: Arc<dyn Agent>,
    ) -> Result<()> {
        let agent_id = agent_id.into();
        let schemas = AgentSchemas::compile(&agent_id, &descriptor)?;
        let mut entries = self.entries.write();

        if entries.iter().any(|e| e.id == agent_id) {
            return Err(EngineError::InvalidInput(format!(
                "Agent \"{}\" is already registered",
                agent_id
            )));
        }

        info!("Registered agent {} ({} {})", agent_id, descriptor.name, descriptor.version);
        entries.push(AgentEntry {
            id: agent_id,
            descriptor: Arc::new(descriptor),
            schemas: Arc::new(schemas),
            agent,
        });
        Ok(())
    }

    pub fn get(&self, agent_id: &str) -> Result<AgentEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| e.id == agent_id)
            .cloned()
            .ok_or_else(|| EngineError::AgentNotFound(agent_id.to_string()))
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.entries.read().iter().any(|e| e.id == agent_id)
    }

    pub fn list(&self) -> Vec<AgentEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// First registered agent
    pub fn default_agent(&self) -> Result<AgentEntry> {
        self.entries
            .read()
            .first()
            .cloned()
            .ok_or_else(|| EngineError::AgentNotFound("default".to_string()))
    }

    /// Agents matching every provided field exactly
    pub fn search(&self, name: Option<&str>, version: Option<&str>) -> Result<Vec<AgentEntry>> {
        if name.is_none() && version.is_none() {
            return Err(EngineError::InvalidInput(
                "Either name or version must be provided".to_string(),
            ));
        }

        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| name.map_or(true, |n| e.descriptor.name == n))
            .filter(|e| version.map_or(true, |v| e.descriptor.version == v))
            .cloned()
            .collect())
    }
}
