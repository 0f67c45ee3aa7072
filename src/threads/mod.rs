// src/threads/mod.rs
//! Threads and the thread-state surface
//!
//! Thread records live in the run store; thread *state* belongs to the
//! agent. The state surface always goes to the default (first registered)
//! agent and passes `ThreadsNotSupported` through untouched so callers
//! can tell "no state" from "unsupported".

use crate::engine::Engine;
use crate::model::{
    new_id, Run, RunCreate, RunSearch, RunStatus, Thread, ThreadCreate, ThreadSearch, ThreadState, ThreadStatus,
    ThreadUpdate, ThreadView,
};
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;
use tracing::{error, info};

impl Engine {
    fn has_pending_run(&self, thread_id: &str) -> bool {
        let search = RunSearch {
            thread_id: Some(thread_id.to_string()),
            status: Some(RunStatus::Pending),
            limit: Some(1),
            ..Default::default()
        };
        !self.ctx.store.search_runs(&search).is_empty()
    }

    fn require_thread(&self, thread_id: &str) -> Result<Thread> {
        self.ctx
            .store
            .get_thread(thread_id)
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))
    }

    /// Current values of a thread, `None` when unknown or unsupported
    async fn thread_values(&self, thread_id: &str) -> Result<Option<Value>> {
        let Ok(entry) = self.ctx.registry.default_agent() else {
            return Ok(None);
        };
        match entry.agent.get_agent_state(thread_id).await {
            Ok(state) => Ok(state.map(|s| s.values)),
            Err(EngineError::ThreadsNotSupported) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a thread, or return the existing one unless `fail_if_exists`
    pub fn create_thread(&self, create: ThreadCreate, fail_if_exists: bool) -> Result<Thread> {
        let thread_id = create.thread_id.unwrap_or_else(new_id);

        if let Some(existing) = self.ctx.store.get_thread(&thread_id) {
            if fail_if_exists {
                return Err(EngineError::DuplicatedThread(thread_id));
            }
            return Ok(existing);
        }

        match self.ctx.store.create_thread(Thread::new(thread_id.clone(), create.metadata)) {
            Ok(thread) => {
                info!("Thread {} created", thread.thread_id);
                Ok(thread)
            }
            Err(EngineError::DuplicatedThread(_)) if !fail_if_exists => self.require_thread(&thread_id),
            Err(e) => Err(e),
        }
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<ThreadView> {
        let thread = self.require_thread(thread_id)?;
        let values = self.thread_values(thread_id).await?;
        Ok(ThreadView { thread, values })
    }

    pub fn search_threads(&self, search: &ThreadSearch) -> Vec<Thread> {
        self.ctx.store.search_threads(search)
    }

    /// New thread with the same metadata and, when the agent keeps state,
    /// the same current values
    pub async fn copy_thread(&self, thread_id: &str) -> Result<Thread> {
        let source = self.require_thread(thread_id)?;

        let mut copy = Thread::new(new_id(), source.metadata.clone());
        copy.status = source.status;
        let copy = self.ctx.store.create_thread(copy)?;

        if let Ok(entry) = self.ctx.registry.default_agent() {
            match entry.agent.get_agent_state(thread_id).await {
                Ok(Some(state)) => {
                    let copied = ThreadState {
                        checkpoint_id: None,
                        values: state.values,
                        metadata: None,
                    };
                    entry.agent.update_agent_state(&copy.thread_id, copied).await?;
                }
                Ok(None) | Err(EngineError::ThreadsNotSupported) => {}
                Err(e) => return Err(e),
            }
        }

        info!("Thread {} copied to {}", thread_id, copy.thread_id);
        Ok(copy)
    }

    /// Update agent-side values first, then metadata
    ///
    /// Metadata is only persisted when the agent accepted the new values.
    pub async fn update_thread(&self, thread_id: &str, update: ThreadUpdate) -> Result<ThreadView> {
        self.require_thread(thread_id)?;

        if let Some(values) = update.values {
            let entry = self.ctx.registry.default_agent()?;
            let state = ThreadState {
                checkpoint_id: update.checkpoint_id.clone(),
                values,
                metadata: None,
            };
            if let Err(e) = entry.agent.update_agent_state(thread_id, state).await {
                error!("Failed to update agent state for thread {}: {}", thread_id, e);
                return Err(e);
            }
        }

        if let Some(metadata) = update.metadata {
            let mut metadata = Some(metadata);
            self.ctx
                .store
                .update_thread(thread_id, &mut |thread| thread.metadata = metadata.take())
                .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;
        }

        self.get_thread(thread_id).await
    }

    /// Delete a thread with no pending run
    pub fn delete_thread(&self, thread_id: &str) -> Result<()> {
        if self.has_pending_run(thread_id) {
            return Err(EngineError::PendingRun(thread_id.to_string()));
        }
        if !self.ctx.store.delete_thread(thread_id) {
            return Err(EngineError::ThreadNotFound(thread_id.to_string()));
        }
        info!("Thread {} deleted", thread_id);
        Ok(())
    }

    pub async fn get_thread_state(&self, thread_id: &str) -> Result<Option<ThreadState>> {
        self.require_thread(thread_id)?;
        let entry = self.ctx.registry.default_agent()?;
        entry.agent.get_agent_state(thread_id).await
    }

    /// Past states, newest first
    pub async fn get_thread_history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<String>,
    ) -> Result<Vec<ThreadState>> {
        self.require_thread(thread_id)?;
        let entry = self.ctx.registry.default_agent()?;
        entry.agent.get_history(thread_id, limit, before).await
    }

    pub async fn update_thread_state(&self, thread_id: &str, state: ThreadState) -> Result<Option<ThreadState>> {
        self.require_thread(thread_id)?;
        let entry = self.ctx.registry.default_agent()?;
        entry.agent.update_agent_state(thread_id, state).await
    }

    /// Submit a run on an existing thread with no run in flight
    /// Submit a run on an existing thread that has no run in flight
    pub fn submit_on_thread(&self, thread_id: &str, create: RunCreate) -> Result<Run> {
        self.require_thread(thread_id)?;
        self.ctx.validator.validate_run_create(&create)?;

        // Check and insert happen under the thread's key lock so concurrent callers admit one run
        let mut create = Some(create);
        let mut admitted = Err(EngineError::PendingRun(thread_id.to_string()));
        self.ctx
            .store
            .update_thread(thread_id, &mut |thread| {
                if self.has_pending_run(thread_id) {
                    return;
                }
                if let Some(create) = create.take() {
                    admitted = self.admit(create, thread_id.to_string());
                    if admitted.is_ok() {
                        thread.status = ThreadStatus::Busy;
                    }
                }
            })
            .ok_or_else(|| EngineError::ThreadNotFound(thread_id.to_string()))?;

        admitted
    }

    pub fn list_thread_runs(&self, thread_id: &str) -> Result<Vec<Run>> {
        self.require_thread(thread_id)?;
        Ok(self.ctx.store.search_runs(&RunSearch {
            thread_id: Some(thread_id.to_string()),
            ..Default::default()
        }))
    }

    /// A run of a thread; fails when the run belongs elsewhere
    pub fn get_thread_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.require_thread(thread_id)?;
        let run = self
            .ctx
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        if run.thread_id != thread_id {
            return Err(EngineError::InvalidInput(format!(
                "Run with ID {} does not belong to thread {}",
                run_id, thread_id
            )));
        }
        Ok(run)
    }

    /// Delete a run through its thread; the run must belong to the thread
    pub fn delete_thread_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let run = self.get_thread_run(thread_id, run_id)?;
        self.delete(&run.run_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::agents::{AgentDescriptor, AgentRegistry, EchoAgent, ScriptedAgent};
    use crate::engine::Engine;
    use crate::model::{Message, RunCreate, ThreadCreate, ThreadSearch, ThreadState, ThreadStatus, ThreadUpdate};
    use crate::utils::config::EngineConfig;
    use crate::utils::errors::EngineError;
    use serde_json::{json, Map};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine_with(default_agent: Arc<dyn crate::agents::Agent>) -> Engine {
        let registry = AgentRegistry::new();
        registry
            .register("default", AgentDescriptor::new("default", "1"), default_agent)
            .unwrap();
        let mut config = EngineConfig::default();
        config.runtime.num_workers = 1;
        Engine::new(config, registry)
    }

    fn echo_engine() -> Engine {
        engine_with(Arc::new(EchoAgent::new()))
    }

    fn metadata(key: &str, value: &str) -> Map<String, serde_json::Value> {
        let mut map = Map::new();
        map.insert(key.into(), json!(value));
        map
    }

    #[tokio::test]
    async fn test_create_thread_idempotence() {
        let engine = echo_engine();
        let create = ThreadCreate {
            thread_id: Some("t1".into()),
            metadata: Some(metadata("user", "ada")),
        };

        let first = engine.create_thread(create.clone(), true).unwrap();
        assert_eq!(first.status, ThreadStatus::Idle);

        let again = engine.create_thread(create.clone(), false).unwrap();
        assert_eq!(again, first);
        assert!(matches!(
            engine.create_thread(create, true),
            Err(EngineError::DuplicatedThread(_))
        ));

        let generated = engine.create_thread(ThreadCreate::default(), true).unwrap();
        assert_ne!(generated.thread_id, "t1");
    }

    #[tokio::test]
    async fn test_thread_follows_run_status() {
        let engine = echo_engine();
        engine
            .create_thread(ThreadCreate { thread_id: Some("t1".into()), metadata: None }, true)
            .unwrap();

        let run = engine
            .submit_on_thread("t1", RunCreate::new("default").with_input(json!({"v": 1})))
            .unwrap();
        assert_eq!(engine.get_thread("t1").await.unwrap().thread.status, ThreadStatus::Busy);
        assert!(matches!(
            engine.submit_on_thread("t1", RunCreate::new("default")),
            Err(EngineError::PendingRun(_))
        ));
        assert!(matches!(engine.delete_thread("t1"), Err(EngineError::PendingRun(_))));

        engine.start();
        engine.await_output(&run.run_id, Some(Duration::from_secs(5))).await.unwrap();
        engine.shutdown().await.unwrap();

        let view = engine.get_thread("t1").await.unwrap();
        assert_eq!(view.thread.status, ThreadStatus::Idle);
        assert_eq!(view.values, Some(json!({"v": 1})));

        assert_eq!(engine.list_thread_runs("t1").unwrap().len(), 1);
        assert_eq!(engine.get_thread_run("t1", &run.run_id).unwrap().run_id, run.run_id);

        engine.delete_thread("t1").unwrap();
        assert!(matches!(engine.get_thread("t1").await, Err(EngineError::ThreadNotFound(_))));
    }

    #[tokio::test]
    async fn test_get_thread_run_rejects_foreign_run() {
        let engine = echo_engine();
        engine
            .create_thread(ThreadCreate { thread_id: Some("t1".into()), metadata: None }, true)
            .unwrap();
        let other = engine.submit(RunCreate::new("default")).unwrap();

        assert!(matches!(
            engine.get_thread_run("t1", &other.run_id),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.list_thread_runs("missing"),
            Err(EngineError::ThreadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_state_surface_and_copy() {
        let engine = echo_engine();
        engine
            .create_thread(
                ThreadCreate { thread_id: Some("t1".into()), metadata: Some(metadata("k", "v")) },
                true,
            )
            .unwrap();
        assert!(engine.get_thread_state("t1").await.unwrap().is_none());

        let state = ThreadState { values: json!({"step": 1}), ..Default::default() };
        let stored = engine.update_thread_state("t1", state).await.unwrap().unwrap();
        assert!(stored.checkpoint_id.is_some());

        engine
            .update_thread(
                "t1",
                ThreadUpdate { values: Some(json!({"step": 2})), ..Default::default() },
            )
            .await
            .unwrap();
        let history = engine.get_thread_history("t1", None, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].values, json!({"step": 2}));

        let copy = engine.copy_thread("t1").await.unwrap();
        assert_ne!(copy.thread_id, "t1");
        assert_eq!(copy.metadata, Some(metadata("k", "v")));
        let copied = engine.get_thread(&copy.thread_id).await.unwrap();
        assert_eq!(copied.values, Some(json!({"step": 2})));
    }

    #[tokio::test]
    async fn test_update_thread_metadata() {
        let engine = echo_engine();
        engine
            .create_thread(ThreadCreate { thread_id: Some("t1".into()), metadata: None }, true)
            .unwrap();

        let view = engine
            .update_thread(
                "t1",
                ThreadUpdate { metadata: Some(metadata("team", "red")), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(view.thread.metadata, Some(metadata("team", "red")));

        let found = engine.search_threads(&ThreadSearch {
            metadata: Some(metadata("team", "red")),
            ..Default::default()
        });
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_state_surface() {
        let engine = engine_with(Arc::new(ScriptedAgent::new(vec![Message::message(json!(1))])));
        engine
            .create_thread(ThreadCreate { thread_id: Some("t1".into()), metadata: Some(metadata("a", "b")) }, true)
            .unwrap();

        assert!(engine.get_thread("t1").await.unwrap().values.is_none());
        assert!(matches!(
            engine.get_thread_state("t1").await,
            Err(EngineError::ThreadsNotSupported)
        ));
        assert!(matches!(
            engine.get_thread_history("t1", Some(5), None).await,
            Err(EngineError::ThreadsNotSupported)
        ));

        let failed = engine
            .update_thread(
                "t1",
                ThreadUpdate {
                    values: Some(json!({})),
                    metadata: Some(metadata("a", "changed")),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(failed, Err(EngineError::ThreadsNotSupported)));
        let thread = engine.get_thread("t1").await.unwrap().thread;
        assert_eq!(thread.metadata, Some(metadata("a", "b")));

        assert!(engine.copy_thread("t1").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_admit_one_run_per_thread() {
        for trial in 0..20 {
            let engine = Arc::new(echo_engine());
            let thread_id = format!("t{}", trial);
            engine
                .create_thread(ThreadCreate { thread_id: Some(thread_id.clone()), metadata: None }, true)
                .unwrap();

            let barrier = Arc::new(tokio::sync::Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    let barrier = Arc::clone(&barrier);
                    let thread_id = thread_id.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        engine.submit_on_thread(&thread_id, RunCreate::new("default"))
                    })
                })
                .collect();

            let mut admitted = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => admitted += 1,
                    Err(e) => assert!(matches!(e, EngineError::PendingRun(_))),
                }
            }
            assert_eq!(admitted, 1);
            assert_eq!(engine.list_thread_runs(&thread_id).unwrap().len(), 1);
            assert_eq!(engine.queued(), 1);
        }
    }

    #[tokio::test]
    async fn test_rejected_submit_leaves_thread_free() {
        let engine = echo_engine();
        engine
            .create_thread(ThreadCreate { thread_id: Some("t1".into()), metadata: None }, true)
            .unwrap();

        assert!(matches!(
            engine.submit_on_thread("t1", RunCreate::new("missing")),
            Err(EngineError::AgentNotFound(_))
        ));
        assert!(matches!(
            engine.submit_on_thread("nope", RunCreate::new("default")),
            Err(EngineError::ThreadNotFound(_))
        ));
        assert_eq!(engine.get_thread("t1").await.unwrap().thread.status, ThreadStatus::Idle);
        assert!(engine.list_thread_runs("t1").unwrap().is_empty());

        let pending = engine.submit_on_thread("t1", RunCreate::new("default")).unwrap();
        engine.delete(&pending.run_id).unwrap();
        assert!(engine.submit_on_thread("t1", RunCreate::new("default")).is_ok());
    }

    #[tokio::test]
    async fn test_delete_thread_run() {
        let engine = echo_engine();
        for id in ["t1", "t2"] {
            engine
                .create_thread(ThreadCreate { thread_id: Some(id.into()), metadata: None }, true)
                .unwrap();
        }
        let run = engine.submit_on_thread("t1", RunCreate::new("default")).unwrap();

        assert!(matches!(
            engine.delete_thread_run("t2", &run.run_id),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.delete_thread_run("missing", &run.run_id),
            Err(EngineError::ThreadNotFound(_))
        ));
        assert!(engine.get(&run.run_id).is_some());

        engine.delete_thread_run("t1", &run.run_id).unwrap();
        assert!(engine.get(&run.run_id).is_none());
        assert!(engine.get_run_info(&run.run_id).is_none());
        assert!(matches!(
            engine.delete_thread_run("t1", &run.run_id),
            Err(EngineError::RunNotFound(_))
        ));
    }
}
