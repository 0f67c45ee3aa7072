// src/validation/mod.rs
//! Payload validation against agent-declared schemas
//!
//! ```text
//! submit ──► validate_run_create   (input_schema, config_schema)
//! worker ──► resolve_interrupt_name (interrupts[].interrupt_payload)
//!        └─► validate_output        (output_schema)
//! resume ──► validate_resume        (interrupts[].resume_payload)
//! ```

pub mod schema;

pub use schema::{AgentSchemas, CompiledSchema, InterruptSchemas, SchemaViolation, SchemaViolations};

use crate::agents::AgentRegistry;
use crate::model::{Message, Run, RunCreate};
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Validation collaborator used by the engine and the worker pool
#[derive(Clone)]
pub struct Validator {
    registry: Arc<AgentRegistry>,
}

impl Validator {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Check a run's output against the agent's output schema
    ///
    /// Null output and agents without an output schema always pass.
    pub fn validate_output(&self, run_id: &str, agent_id: &str, output: &Value) -> Result<()> {
        if output.is_null() {
            return Ok(());
        }
        let entry = self.registry.get(agent_id)?;
        let Some(schema) = &entry.schemas.output else {
            return Ok(());
        };

        schema.check(output).map_err(|violations| {
            EngineError::InvalidFormat(format!(
                "Output validation failed for run {}: {}",
                run_id, violations
            ))
        })
    }

    /// Check input and `config.configurable` of a create request
    pub fn validate_run_create(&self, create: &RunCreate) -> Result<()> {
        let entry = self.registry.get(&create.agent_id)?;
        let schemas = &entry.schemas;

        if let Some(schema) = &schemas.input {
            let input = create.input.as_ref().ok_or_else(|| {
                EngineError::InvalidInput(format!("Agent {} requires an input", create.agent_id))
            })?;
            schema
                .check(input)
                .map_err(|v| EngineError::InvalidInput(format!("Invalid run input: {}", v)))?;
        }

        if let Some(schema) = &schemas.config {
            let configurable = create
                .config
                .as_ref()
                .and_then(|c| c.configurable.as_ref())
                .ok_or_else(|| {
                    EngineError::InvalidInput(format!(
                        "Agent {} requires config.configurable",
                        create.agent_id
                    ))
                })?;
            schema
                .check(&Value::Object(configurable.clone()))
                .map_err(|v| EngineError::InvalidInput(format!("Invalid run config: {}", v)))?;
        }

        Ok(())
    }

    /// Check a resume payload against the paused interrupt's declared type
    pub fn validate_resume(&self, run: &Run, payload: &Value) -> Result<()> {
        let entry = self.registry.get(&run.agent_id)?;
        let interrupt = run.interrupt.as_ref().ok_or_else(|| EngineError::InvalidStatus {
            run_id: run.run_id.clone(),
            expected: "interrupted with a stored interrupt".to_string(),
            actual: run.status.to_string(),
        })?;

        if entry.schemas.interrupts.is_empty() {
            return Ok(());
        }

        let name = interrupt.name.as_deref().unwrap_or_default();
        let declared = entry.schemas.interrupt(name).ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "Interrupt \"{}\" is not declared by agent {}",
                name, run.agent_id
            ))
        })?;

        if let Some(schema) = &declared.resume {
            schema
                .check(payload)
                .map_err(|v| EngineError::InvalidInput(format!("Invalid resume payload: {}", v)))?;
        }
        Ok(())
    }

    /// Name an interrupt message by matching its payload against the
    /// agent's declared interrupt payloads
    ///
    /// Messages that already carry a name keep it. Agents declaring no
    /// interrupts fall back to the event tag.
    pub fn resolve_interrupt_name(&self, agent_id: &str, message: &Message) -> Result<Option<String>> {
        if let Some(name) = &message.interrupt_name {
            return Ok(Some(name.clone()));
        }

        let entry = self.registry.get(agent_id)?;
        let interrupts = &entry.schemas.interrupts;
        if interrupts.is_empty() {
            return Ok(message.event.clone());
        }

        let resolved = interrupts.iter().find(|declared| {
            declared
                .payload
                .as_ref()
                .map_or(true, |schema| schema.is_valid(&message.data))
        });

        match resolved {
            Some(declared) => {
                debug!("Resolved interrupt payload to {}", declared.interrupt_type);
                Ok(Some(declared.interrupt_type.clone()))
            }
            None => Err(EngineError::InvalidFormat(format!(
                "Interrupt payload does not match any interrupt declared by agent {}",
                agent_id
            ))),
        }
    }
}
