// src/agents/builtin.rs
//! Built-in agents selected from configuration
//!
//! | Kind | Behaviour | Threads |
//! |------|-----------|---------|
//! | `echo` | Echoes the run input; `{"interrupt": true}` pauses, `{"fail": true}` raises | Yes, in-memory history |
//! | `scripted` | Replays a fixed message list, continuing after the paused interrupt on resume | No |
//!
//! Adapters for external workflow engines implement [`Agent`] directly and
//! are registered explicitly; these two cover the daemon and tests.

use crate::agents::agent::{Agent, MessageStream};
use crate::agents::registry::{AgentDescriptor, AgentRegistry, InterruptSpec};
use crate::model::{new_id, Message, Run, ThreadState};
use crate::utils::errors::{EngineError, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Event tag attached to interrupts raised by the echo agent
pub const ECHO_INTERRUPT_EVENT: &str = "echo_interrupt";

/// Built-in agent variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Echo,
    Scripted,
}

/// One `[[agents]]` entry of the engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    #[serde(default)]
    pub kind: AgentKind,

    pub name: String,
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub input_schema: Option<Value>,

    #[serde(default)]
    pub output_schema: Option<Value>,

    #[serde(default)]
    pub config_schema: Option<Value>,

    #[serde(default)]
    pub interrupts: Vec<InterruptSpec>,

    /// Script for `scripted` agents
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl AgentConfig {
    pub fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            config_schema: self.config_schema.clone(),
            interrupts: self.interrupts.clone(),
        }
    }

    pub fn build(&self) -> Arc<dyn Agent> {
        match self.kind {
            AgentKind::Echo => Arc::new(EchoAgent::new()),
            AgentKind::Scripted => Arc::new(ScriptedAgent::new(self.messages.clone())),
        }
    }
}

impl AgentRegistry {
    /// Build a registry from configured agents, in order
    pub fn from_configs(configs: &[AgentConfig]) -> Result<Self> {
        let registry = Self::new();
        for config in configs {
            registry.register(config.id.clone(), config.descriptor(), config.build())?;
        }
        Ok(registry)
    }
}

/// Echoes its input and keeps a per-thread state history
#[derive(Debug, Default, Clone)]
pub struct EchoAgent {
    /// Oldest first
    history: Arc<DashMap<String, Vec<ThreadState>>>,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

fn flag(input: &Value, key: &str) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn record_state(history: &DashMap<String, Vec<ThreadState>>, thread_id: &str, values: Value) -> ThreadState {
    let state = ThreadState {
        checkpoint_id: Some(new_id()),
        values,
        metadata: None,
    };
    history.entry(thread_id.to_string()).or_default().push(state.clone());
    state
}

#[async_trait]
impl Agent for EchoAgent {
    fn astream(&self, run: Run) -> MessageStream {
        let history = Arc::clone(&self.history);

        try_stream! {
            let input = run.input.clone().unwrap_or(Value::Null);

            if let Some(answer) = run.resume_value() {
                let values = json!({ "input": input, "resume": answer });
                record_state(&history, &run.thread_id, values.clone());
                yield Message::message(values);
                return;
            }

            if flag(&input, "fail") {
                Err::<(), _>(EngineError::agent(format!("Echo agent failed run {}", run.run_id)))?;
            }

            if flag(&input, "interrupt") {
                debug!("Echo agent pausing run {}", run.run_id);
                yield Message::interrupt(input).with_event(ECHO_INTERRUPT_EVENT);
                return;
            }

            record_state(&history, &run.thread_id, input.clone());
            yield Message::message(input);
        }
        .boxed()
    }

    async fn get_agent_state(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        Ok(self.history.get(thread_id).and_then(|h| h.last().cloned()))
    }

    async fn get_history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<String>,
    ) -> Result<Vec<ThreadState>> {
        let Some(history) = self.history.get(thread_id) else {
            return Ok(Vec::new());
        };

        let newest_first = history.iter().rev();
        let states: Vec<ThreadState> = match before {
            Some(before) => newest_first
                .skip_while(|s| s.checkpoint_id.as_deref() != Some(before.as_str()))
                .skip(1)
                .cloned()
                .collect(),
            None => newest_first.cloned().collect(),
        };

        Ok(match limit {
            Some(limit) => states.into_iter().take(limit).collect(),
            None => states,
        })
    }

    async fn update_agent_state(&self, thread_id: &str, mut state: ThreadState) -> Result<Option<ThreadState>> {
        if state.checkpoint_id.is_none() {
            state.checkpoint_id = Some(new_id());
        }
        self.history
            .entry(thread_id.to_string())
            .or_default()
            .push(state.clone());
        Ok(Some(state))
    }
}

/// Replays a fixed list of messages
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    messages: Arc<Vec<Message>>,
}

impl ScriptedAgent {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(messages),
        }
    }

    /// Position just after the interrupt the run paused on
    fn resume_point(&self, run: &Run) -> usize {
        let Some(interrupt) = run.interrupt.as_ref().filter(|i| i.is_answered()) else {
            return 0;
        };
        self.messages
            .iter()
            .position(|m| m.is_interrupt() && m.data == interrupt.ai_data)
            .map_or(0, |idx| idx + 1)
    }
}

impl Agent for ScriptedAgent {
    fn astream(&self, run: Run) -> MessageStream {
        let start = self.resume_point(&run);
        let remaining: Vec<Result<Message>> = self.messages[start..].iter().cloned().map(Ok).collect();
        futures::stream::iter(remaining).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Interrupt, RunCreate};

    fn run_with(input: Value) -> Run {
        Run::from_create(RunCreate::new("echo").with_input(input), "t1".into())
    }

    async fn collect(agent: &dyn Agent, run: Run) -> Vec<Result<Message>> {
        agent.astream(run).collect().await
    }

    #[tokio::test]
    async fn test_echo_roundtrip_records_state() {
        let agent = EchoAgent::new();
        let messages = collect(&agent, run_with(json!({"x": 1}))).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].as_ref().unwrap().data, json!({"x": 1}));

        let state = agent.get_agent_state("t1").await.unwrap().unwrap();
        assert_eq!(state.values, json!({"x": 1}));
        assert!(agent.get_agent_state("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_echo_interrupt_then_resume() {
        let agent = EchoAgent::new();
        let mut run = run_with(json!({"interrupt": true}));

        let messages = collect(&agent, run.clone()).await;
        let paused = messages[0].as_ref().unwrap();
        assert!(paused.is_interrupt());
        assert_eq!(paused.event.as_deref(), Some(ECHO_INTERRUPT_EVENT));

        run.interrupt = Some(Interrupt {
            event: paused.event.clone(),
            name: None,
            ai_data: paused.data.clone(),
            user_data: Some(json!({"answer": "yes"})),
        });
        let messages = collect(&agent, run).await;
        assert_eq!(messages[0].as_ref().unwrap().data["resume"], json!({"answer": "yes"}));
    }

    #[tokio::test]
    async fn test_echo_failure() {
        let messages = collect(&EchoAgent::new(), run_with(json!({"fail": true}))).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Err(EngineError::Agent(_))));
    }

    #[tokio::test]
    async fn test_echo_history_pagination() {
        let agent = EchoAgent::new();
        for i in 0..4 {
            collect(&agent, run_with(json!({"i": i}))).await;
        }

        let all = agent.get_history("t1", None, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].values, json!({"i": 3}));

        let before = all[1].checkpoint_id.clone();
        let older = agent.get_history("t1", Some(1), before).await.unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].values, json!({"i": 1}));
    }

    #[tokio::test]
    async fn test_scripted_resumes_after_interrupt() {
        let agent = ScriptedAgent::new(vec![
            Message::message(json!("first")),
            Message::interrupt(json!({"question": "continue?"})),
            Message::message(json!("second")),
        ]);
        let mut run = run_with(Value::Null);

        let all = collect(&agent, run.clone()).await;
        assert_eq!(all.len(), 3);

        run.interrupt = Some(Interrupt {
            event: None,
            name: None,
            ai_data: json!({"question": "continue?"}),
            user_data: Some(json!(true)),
        });
        let resumed = collect(&agent, run).await;
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].as_ref().unwrap().data, json!("second"));

        assert!(matches!(
            agent.get_agent_state("t1").await,
            Err(EngineError::ThreadsNotSupported)
        ));
    }

    #[test]
    fn test_config_builds_registry() {
        let configs = vec![
            AgentConfig {
                id: "echo".into(),
                name: "echo-agent".into(),
                version: "1.0.0".into(),
                ..Default::default()
            },
            AgentConfig {
                id: "script".into(),
                kind: AgentKind::Scripted,
                name: "script".into(),
                version: "0.1.0".into(),
                messages: vec![Message::message(json!(1))],
                ..Default::default()
            },
        ];
        let registry = AgentRegistry::from_configs(&configs).unwrap();
        assert_eq!(registry.default_agent().unwrap().id, "echo");
        assert_eq!(registry.get("script").unwrap().descriptor.name, "script");

        let kind: AgentKind = serde_json::from_value(json!("scripted")).unwrap();
        assert_eq!(kind, AgentKind::Scripted);
    }
}
