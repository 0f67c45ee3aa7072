// src/validation/schema.rs
//! Compiled agent schemas
//!
//! Every schema an agent declares is compiled once, when the agent is
//! registered, and shared by all later checks. The draft follows `$schema`
//! (Draft 7 when absent); local `$ref`s into `$defs` or `definitions`
//! resolve against the schema document itself.

use crate::agents::AgentDescriptor;
use crate::utils::errors::{EngineError, Result};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;

/// One failed keyword, located by JSON pointer into the instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// All violations of a single instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolations(pub Vec<SchemaViolation>);

impl fmt::Display for SchemaViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

pub struct CompiledSchema {
    raw: Value,
    compiled: JSONSchema,
}

impl CompiledSchema {
    /// Compile `schema`; the error is the compiler's reason
    pub fn compile(schema: &Value) -> std::result::Result<Self, String> {
        let compiled = JSONSchema::compile(schema).map_err(|e| e.to_string())?;
        Ok(Self {
            raw: schema.clone(),
            compiled,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn check(&self, instance: &Value) -> std::result::Result<(), SchemaViolations> {
        self.compiled.validate(instance).map_err(|errors| {
            SchemaViolations(
                errors
                    .map(|e| {
                        let message = e.to_string();
                        let segments = e.instance_path.into_vec();
                        let path = if segments.is_empty() {
                            String::new()
                        } else {
                            format!("/{}", segments.join("/"))
                        };
                        SchemaViolation { path, message }
                    })
                    .collect(),
            )
        })
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.compiled.is_valid(instance)
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledSchema").field(&self.raw).finish()
    }
}

/// Compiled schemas of one declared interrupt type
#[derive(Debug)]
pub struct InterruptSchemas {
    pub interrupt_type: String,
    pub payload: Option<CompiledSchema>,
    pub resume: Option<CompiledSchema>,
}

/// Compiled form of every schema in an [`AgentDescriptor`]
#[derive(Debug, Default)]
pub struct AgentSchemas {
    pub input: Option<CompiledSchema>,
    pub output: Option<CompiledSchema>,
    pub config: Option<CompiledSchema>,

    /// In declaration order
    pub interrupts: Vec<InterruptSchemas>,
}

impl AgentSchemas {
    /// Compile a descriptor's schemas, rejecting the agent on the first bad one
    pub fn compile(agent_id: &str, descriptor: &AgentDescriptor) -> Result<Self> {
        let compile = |what: &str, schema: &Option<Value>| -> Result<Option<CompiledSchema>> {
            schema
                .as_ref()
                .map(|s| {
                    CompiledSchema::compile(s).map_err(|reason| {
                        EngineError::InvalidInput(format!(
                            "Agent {} declares an invalid {}: {}",
                            agent_id, what, reason
                        ))
                    })
                })
                .transpose()
        };

        let interrupts = descriptor
            .interrupts
            .iter()
            .map(|spec| {
                let what = format!("\"{}\" interrupt", spec.interrupt_type);
                Ok(InterruptSchemas {
                    interrupt_type: spec.interrupt_type.clone(),
                    payload: compile(&format!("{} payload schema", what), &spec.interrupt_payload)?,
                    resume: compile(&format!("{} resume schema", what), &spec.resume_payload)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            input: compile("input schema", &descriptor.input_schema)?,
            output: compile("output schema", &descriptor.output_schema)?,
            config: compile("config schema", &descriptor.config_schema)?,
            interrupts,
        })
    }

    pub fn interrupt(&self, interrupt_type: &str) -> Option<&InterruptSchemas> {
        self.interrupts.iter().find(|i| i.interrupt_type == interrupt_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::InterruptSpec;
    use serde_json::json;

    fn message_schema() -> Value {
        json!({
            "$defs": {
                "Message": {
                    "properties": {
                        "type": {
                            "$ref": "#/$defs/Type",
                            "description": "originator of the message"
                        },
                        "content": {"title": "Content", "type": "string"}
                    },
                    "required": ["type", "content"],
                    "title": "Message",
                    "type": "object"
                },
                "Type": {
                    "enum": ["human", "assistant", "ai"],
                    "title": "Type",
                    "type": "string"
                }
            },
            "properties": {
                "messages": {
                    "anyOf": [
                        {"items": {"$ref": "#/$defs/Message"}, "type": "array"},
                        {"type": "null"}
                    ],
                    "title": "Messages"
                }
            },
            "additionalProperties": false,
            "title": "OutputState",
            "type": "object"
        })
    }

    fn compile(schema: Value) -> CompiledSchema {
        CompiledSchema::compile(&schema).unwrap()
    }

    #[test]
    fn test_refs_into_defs() {
        let schema = compile(message_schema());

        assert!(schema.is_valid(&json!({"messages": [{"type": "ai", "content": "hi"}]})));
        assert!(schema.is_valid(&json!({"messages": null})));
        assert!(schema.is_valid(&json!({})));

        let violations = schema
            .check(&json!({"messages": [{"type": "robot", "content": "hi"}]}))
            .unwrap_err();
        assert_eq!(violations.0.len(), 1);
        assert!(!schema.is_valid(&json!({"messages": [{"type": "human"}]})));
        assert!(!schema.is_valid(&json!({"messages": [], "extra": 1})));
    }

    #[test]
    fn test_ref_reports_instance_path() {
        let schema = compile(json!({
            "$defs": {"Type": {"enum": ["human", "assistant", "ai"], "type": "string"}},
            "properties": {"type": {"$ref": "#/$defs/Type"}},
            "required": ["type"]
        }));

        assert!(schema.check(&json!({"type": "human"})).is_ok());
        let violations = schema.check(&json!({"type": "robot"})).unwrap_err();
        assert_eq!(violations.0[0].path, "/type");
        assert!(violations.to_string().starts_with("/type: "));
    }

    #[test]
    fn test_combinators_and_string_rules() {
        let all_of = compile(json!({"allOf": [{"type": "integer"}, {"minimum": 2}]}));
        assert!(all_of.is_valid(&json!(3)));
        assert!(!all_of.is_valid(&json!("x")));
        assert!(!all_of.is_valid(&json!(1)));

        let pattern = compile(json!({"type": "string", "pattern": "^[0-9]+$"}));
        assert!(pattern.is_valid(&json!("123")));
        assert!(!pattern.is_valid(&json!("abc")));

        let not = compile(json!({"not": {"type": "null"}}));
        assert!(!not.is_valid(&Value::Null));

        let items = compile(json!({"type": "array", "minItems": 1, "maxItems": 2}));
        assert!(items.is_valid(&json!([1])));
        assert!(!items.is_valid(&json!([])));
        assert!(!items.is_valid(&json!([1, 2, 3])));

        let conditional = compile(json!({
            "if": {"properties": {"kind": {"const": "num"}}},
            "then": {"properties": {"value": {"type": "number"}}}
        }));
        assert!(conditional.is_valid(&json!({"kind": "num", "value": 1})));
        assert!(!conditional.is_valid(&json!({"kind": "num", "value": "one"})));
        assert!(conditional.is_valid(&json!({"kind": "text", "value": "one"})));
    }

    #[test]
    fn test_compile_rejects_bad_schemas() {
        assert!(CompiledSchema::compile(&json!({"type": "no-such-type"})).is_err());

        let descriptor = AgentDescriptor::new("bad", "1").with_interrupt(InterruptSpec {
            interrupt_type: "ask".into(),
            interrupt_payload: None,
            resume_payload: Some(json!({"minLength": "three"})),
        });
        let err = AgentSchemas::compile("bad", &descriptor).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(err.to_string().contains("\"ask\" interrupt resume schema"));
    }

    #[test]
    fn test_agent_schemas_lookup() {
        let descriptor = AgentDescriptor::new("a", "1")
            .with_output_schema(message_schema())
            .with_interrupt(InterruptSpec {
                interrupt_type: "ask".into(),
                interrupt_payload: Some(json!({"required": ["question"]})),
                resume_payload: None,
            });
        let schemas = AgentSchemas::compile("a", &descriptor).unwrap();

        assert!(schemas.input.is_none());
        assert_eq!(schemas.output.as_ref().unwrap().raw(), &message_schema());
        let ask = schemas.interrupt("ask").unwrap();
        assert!(ask.payload.is_some());
        assert!(ask.resume.is_none());
        assert!(schemas.interrupt("other").is_none());
    }
}
