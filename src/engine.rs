// src/engine.rs
//! The run engine
//!
//! [`Engine`] is the explicitly constructed owner of every table the
//! runtime shares: run store, agent registry, admission queue, stream
//! fan-out and status notifier. Independent engines never share state.
//!
//! # Lifecycle
//!
//! ```text
//! Engine::open(config, registry)   load snapshot, re-enqueue unfinished runs
//!     .start()                     spawn workers (+ periodic snapshots)
//!     ... submit / resume / await_output / join ...
//!     .shutdown()                  stop workers, final snapshot
//! ```

use crate::agents::AgentRegistry;
use crate::model::{
    new_id, now, ControlSignal, Message, Run, RunCreate, RunInfo, RunSearch, RunStatus, ThreadStatus,
};
use crate::observability::RUNS_SUBMITTED;
use crate::runtime::{AdmissionQueue, StatusNotifier, StreamManager, WorkerContext, WorkerPool};
use crate::storage::{MemoryRunStore, RunStore, SnapshotWriter};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use crate::validation::Validator;
use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Item of [`Engine::stream_events`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A message's data, with the run's status at the time it was relayed
    Values {
        run_id: String,
        status: RunStatus,
        values: Value,
    },
    /// Nothing arrived within the join timeout
    Heartbeat,
}

pub struct Engine {
    pub(crate) ctx: Arc<WorkerContext>,
    config: EngineConfig,
    pool: WorkerPool,
    cancel: CancellationToken,
    snapshots: Option<SnapshotWriter>,
    snapshot_task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Engine over a fresh in-memory store
    pub fn new(config: EngineConfig, registry: AgentRegistry) -> Self {
        Self::with_store(config, registry, Arc::new(MemoryRunStore::new()))
    }

    /// Engine over an existing store; nothing is re-enqueued
    pub fn with_store(config: EngineConfig, registry: AgentRegistry, store: Arc<dyn RunStore>) -> Self {
        let registry = Arc::new(registry);
        let ctx = Arc::new(WorkerContext {
            store,
            validator: Validator::new(Arc::clone(&registry)),
            registry,
            queue: Arc::new(AdmissionQueue::new()),
            streams: StreamManager::new(),
            notifier: Arc::new(StatusNotifier::new()),
            max_attempts: config.runtime.max_attempts,
        });

        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(Arc::clone(&ctx), config.runtime.num_workers, cancel.clone());
        let snapshots = config
            .storage
            .persist
            .then(|| SnapshotWriter::new(config.storage.path.clone(), config.storage.persist_threads));

        Self {
            ctx,
            config,
            pool,
            cancel,
            snapshots,
            snapshot_task: Mutex::new(None),
        }
    }

    /// Engine restored from the configured snapshot
    ///
    /// Runs that were queued, executing, or waiting for a retry when the
    /// snapshot was taken are re-enqueued.
    pub async fn open(config: EngineConfig, registry: AgentRegistry) -> Self {
        if !config.storage.persist {
            return Self::new(config, registry);
        }

        let writer = SnapshotWriter::new(config.storage.path.clone(), config.storage.persist_threads);
        let store = writer.load().await;
        let engine = Self::with_store(config, registry, Arc::new(store));
        engine.recover();
        engine
    }

    fn recover(&self) -> usize {
        let max_attempts = self.ctx.max_attempts;
        let mut recovered = 0;

        for run in self.ctx.store.list_runs() {
            let unfinished = match run.status {
                RunStatus::Pending => true,
                RunStatus::Error => self
                    .ctx
                    .store
                    .get_run_info(&run.run_id)
                    .is_some_and(|info| info.attempts < max_attempts),
                _ => false,
            };
            if unfinished {
                self.ctx.queue.push(run.run_id);
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!("Recovered {} unfinished runs", recovered);
        }
        recovered
    }

    /// Spawn the worker pool and the periodic snapshot task
    pub fn start(&self) {
        self.pool.start();

        let Some(writer) = self.snapshots.clone() else {
            return;
        };
        let interval_secs = self.config.storage.snapshot_interval_secs;
        if interval_secs == 0 {
            return;
        }

        let mut task = self.snapshot_task.lock();
        if task.is_some() {
            return;
        }

        let store = Arc::clone(&self.ctx.store);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = writer.save(store.as_ref()).await {
                            error!("Periodic snapshot failed: {}", e);
                        }
                    }
                }
            }
        }));
        debug!("Snapshot task started ({}s interval)", interval_secs);
    }

    /// Stop workers and write a final snapshot
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.shutdown().await;

        let task = self.snapshot_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Snapshot task failed: {}", e);
            }
        }

        if let Some(writer) = &self.snapshots {
            writer.save(self.ctx.store.as_ref()).await?;
        }
        info!("Engine stopped");
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.ctx.registry
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.ctx.store
    }

    /// Runs waiting in the admission queue
    pub fn queued(&self) -> usize {
        self.ctx.queue.len()
    }

    /// Create a run and admit it
    pub fn submit(&self, create: RunCreate) -> Result<Run> {
        if !self.ctx.registry.contains(&create.agent_id) {
            return Err(EngineError::AgentNotFound(create.agent_id));
        }
        self.ctx.validator.validate_run_create(&create)?;

        let thread_id = create.thread_id.clone().unwrap_or_else(new_id);
        let run = self.admit(create, thread_id)?;
        self.ctx
            .store
            .update_thread(&run.thread_id, &mut |thread| thread.status = ThreadStatus::Busy);
        Ok(run)
    }

    /// Persist an already validated run and push it onto the queue
    pub(crate) fn admit(&self, create: RunCreate, thread_id: String) -> Result<Run> {
        let run = self.ctx.store.create_run(Run::from_create(create, thread_id))?;
        self.ctx.store.create_run_info(RunInfo::new(&run.run_id));
        self.ctx.queue.push(run.run_id.clone());

        counter!(RUNS_SUBMITTED).increment(1);
        info!("Run {} submitted for agent {}", run.run_id, run.agent_id);
        Ok(run)
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        self.ctx.store.get_run(run_id)
    }

    /// Last persisted output of a run
    pub fn get_output(&self, run_id: &str) -> Option<Value> {
        self.ctx.store.get_run_output(run_id)
    }

    pub fn get_run_info(&self, run_id: &str) -> Option<RunInfo> {
        self.ctx.store.get_run_info(run_id)
    }

    pub fn search(&self, search: &RunSearch) -> Vec<Run> {
        self.ctx.store.search_runs(search)
    }

    /// Remove a run, its statistics and its output
    pub fn delete(&self, run_id: &str) -> Result<()> {
        if !self.ctx.store.delete_run(run_id) {
            return Err(EngineError::RunNotFound(run_id.to_string()));
        }
        self.ctx.notifier.forget(run_id);
        info!("Run {} deleted", run_id);
        Ok(())
    }

    /// Answer an interrupted run and re-admit it
    ///
    /// Fails without touching the run unless it is `interrupted` with a
    /// stored interrupt.
    pub fn resume(&self, run_id: &str, user_input: Value) -> Result<Run> {
        let run = self
            .ctx
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let invalid_status = |actual: RunStatus| EngineError::InvalidStatus {
            run_id: run_id.to_string(),
            expected: RunStatus::Interrupted.to_string(),
            actual: actual.to_string(),
        };
        if run.status != RunStatus::Interrupted || run.interrupt.is_none() {
            return Err(invalid_status(run.status));
        }
        self.ctx.validator.validate_resume(&run, &user_input)?;

        // Status is re-checked under the key lock so concurrent resumes admit the run once
        let mut applied = false;
        let updated = self
            .ctx
            .store
            .update_run(run_id, &mut |r| {
                if r.status != RunStatus::Interrupted {
                    return;
                }
                if let Some(interrupt) = r.interrupt.as_mut() {
                    interrupt.user_data = Some(user_input.clone());
                    r.status = RunStatus::Pending;
                    applied = true;
                }
            })
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        if !applied {
            return Err(invalid_status(updated.status));
        }

        let queued_at = now();
        self.ctx
            .store
            .update_run_info(run_id, &mut |info| info.requeue(queued_at));
        self.ctx
            .store
            .update_thread(&updated.thread_id, &mut |thread| thread.status = ThreadStatus::Busy);
        self.ctx.queue.push(run_id);

        info!("Run {} resumed", run_id);
        Ok(updated)
    }

    /// Block until the run leaves `pending`, returning the run and its output
    ///
    /// Returns immediately when the run is already finished. When `timeout`
    /// elapses first the call fails with [`EngineError::Timeout`]; the run
    /// itself keeps going.
    pub async fn await_output(&self, run_id: &str, timeout: Option<Duration>) -> Result<(Run, Option<Value>)> {
        let run = self
            .ctx
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        if !run.status.is_pending() {
            return Ok((run, self.ctx.store.get_run_output(run_id)));
        }

        let store = Arc::clone(&self.ctx.store);
        let finished = self
            .ctx
            .notifier
            .wait_until(run_id, timeout, || {
                store.get_run_status(run_id).map_or(true, |status| !status.is_pending())
            })
            .await;

        if !finished {
            warn!("Timeout reached while waiting for run {}", run_id);
            return Err(EngineError::Timeout(run_id.to_string()));
        }

        let run = self
            .ctx
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        Ok((run, self.ctx.store.get_run_output(run_id)))
    }

    /// Live message stream of a run
    ///
    /// Ends after `control:"done"`. While nothing arrives, a
    /// `control:"timeout"` is yielded every join timeout and the stream
    /// keeps waiting. Joining a finished run with nothing queued yields
    /// an empty stream; earlier messages are not replayed.
    pub fn join(&self, run_id: &str) -> Result<BoxStream<'static, Message>> {
        let mut subscription = self.ctx.streams.subscribe(run_id);

        // Checked after subscribing so a run finishing in between is not missed
        let run = self
            .ctx
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let first = subscription.try_recv();
        if !run.status.is_pending() && first.is_none() {
            debug!("Run {} already finished, nothing to join", run_id);
            return Ok(futures::stream::empty().boxed());
        }

        let timeout = self.config.runtime.join_timeout();
        let run_id = run_id.to_string();

        Ok(stream! {
            if let Some(message) = first {
                let done = message.is_done();
                yield message;
                if done {
                    return;
                }
            }

            loop {
                match tokio::time::timeout(timeout, subscription.recv()).await {
                    Ok(Some(message)) => {
                        let done = message.is_done();
                        yield message;
                        if done {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!("Timeout waiting for run {}", run_id);
                        yield Message::control(ControlSignal::Timeout);
                    }
                }
            }
        }
        .boxed())
    }

    /// [`join`](Self::join) mapped to value events
    pub fn stream_events(&self, run_id: &str) -> Result<BoxStream<'static, Result<RunEvent>>> {
        let mut messages = self.join(run_id)?;
        let store = Arc::clone(&self.ctx.store);
        let run_id = run_id.to_string();

        Ok(stream! {
            while let Some(message) = messages.next().await {
                if message.is_control() {
                    if message.is_done() {
                        break;
                    }
                    if message.is_timeout() {
                        yield Ok(RunEvent::Heartbeat);
                        continue;
                    }
                    error!("Unknown control message {} in stream for run {}", message.data, run_id);
                    continue;
                }

                match store.get_run_status(&run_id) {
                    Some(status) => {
                        yield Ok(RunEvent::Values {
                            run_id: run_id.clone(),
                            status,
                            values: message.data,
                        });
                    }
                    None => {
                        yield Err(EngineError::RunNotFound(run_id.clone()));
                        break;
                    }
                }
            }
        }
        .boxed())
    }

    /// Drain the run's stream and return the last message data seen
    pub async fn wait(&self, run_id: &str) -> Result<Option<Value>> {
        let mut messages = self.join(run_id)?;
        let mut last = None;
        while let Some(message) = messages.next().await {
            if !message.is_control() {
                last = Some(message.data);
            }
        }
        Ok(last)
    }
}
