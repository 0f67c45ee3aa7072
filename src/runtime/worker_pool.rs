// src/runtime/worker_pool.rs
//! Worker pool driving runs to completion
//!
//! N worker tasks drain the [`AdmissionQueue`]. Each dequeued run goes
//! through one execution attempt:
//!
//! ```text
//! pop run_id
//!   └─► mark started (attempts += 1, status = pending)
//!         ├─ attempts > ceiling ──────────────► error (AttemptsExceeded), done
//!         └─ subscribe, consume agent stream, publish each message
//!               ├─ ok, last message ──────────► success + output, done
//!               ├─ ok, interrupt ─────────────► interrupted + Interrupt, done
//!               └─ agent error / bad output ──► error + error text
//!                     ├─ attempts < ceiling ──► re-enqueue
//!                     └─ exhausted ───────────► done
//! ```
//!
//! A failing run never takes its worker down; the error becomes the run's
//! output and status.

use crate::agents::AgentRegistry;
use crate::model::{now, ControlSignal, Interrupt, Message, Run, RunInfo, RunStatus, ThreadStatus};
use crate::observability::{RUNS_FINISHED, RUN_EXEC_SECONDS, RUN_QUEUE_SECONDS, RUN_RETRIES};
use crate::runtime::notifier::StatusNotifier;
use crate::runtime::queue::AdmissionQueue;
use crate::runtime::stream::StreamManager;
use crate::storage::RunStore;
use crate::utils::errors::{EngineError, Result};
use crate::validation::Validator;
use futures::{FutureExt, StreamExt};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a worker touches, shared with the engine
pub struct WorkerContext {
    pub store: Arc<dyn RunStore>,
    pub registry: Arc<AgentRegistry>,
    pub validator: Validator,
    pub queue: Arc<AdmissionQueue>,
    pub streams: StreamManager,
    pub notifier: Arc<StatusNotifier>,

    /// Dequeues allowed per run
    pub max_attempts: u32,
}

impl WorkerContext {
    /// Persist a status change and mirror it onto the run's thread
    fn set_status(&self, run_id: &str, update: &mut dyn FnMut(&mut Run)) -> Option<Run> {
        let run = self.store.update_run(run_id, update)?;
        let thread_status = ThreadStatus::from(run.status);
        self.store
            .update_thread(&run.thread_id, &mut |thread| thread.status = thread_status);
        Some(run)
    }

    fn finish_attempt(&self, run_id: &str, requeue: bool) -> Option<RunInfo> {
        let ended_at = now();
        let info = self.store.update_run_info(run_id, &mut |info| {
            info.mark_ended(ended_at);
            if requeue {
                info.queued_at = ended_at;
            }
        })?;

        if let Some(exec_s) = info.exec_s {
            histogram!(RUN_EXEC_SECONDS).record(exec_s);
        }
        if let Some(queue_s) = info.queue_s {
            histogram!(RUN_QUEUE_SECONDS).record(queue_s);
        }
        Some(info)
    }
}

/// Fixed-size pool of worker tasks
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    num_workers: usize,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(ctx: Arc<WorkerContext>, num_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            num_workers,
            cancel,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers; a second call is a no-op
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        for worker_id in 0..self.num_workers {
            let ctx = Arc::clone(&self.ctx);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(worker_loop(worker_id, ctx, cancel)));
        }
        info!("Worker pool started with {} workers", self.num_workers);
    }

    /// Cancel the workers and wait for them to exit
    ///
    /// A run abandoned mid-attempt stays `pending` and is picked up again
    /// by recovery on the next start.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty() && !self.cancel.is_cancelled()
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    debug!("Worker {} started", worker_id);

    loop {
        let run_id = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            run_id = ctx.queue.pop() => run_id,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Worker {} abandoning run {} on shutdown", worker_id, run_id);
                break;
            }
            _ = execute_run(&ctx, &run_id) => {}
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// One execution attempt of `run_id`
pub async fn execute_run(ctx: &WorkerContext, run_id: &str) {
    let Some(run) = ctx.store.get_run(run_id) else {
        warn!("Dequeued run {} no longer exists", run_id);
        return;
    };

    let started_at = now();
    let attempts = match ctx
        .store
        .update_run_info(run_id, &mut |info| info.mark_started(started_at))
    {
        Some(info) => info.attempts,
        None => {
            let mut info = RunInfo::new(run_id);
            info.mark_started(started_at);
            ctx.store.create_run_info(info).attempts
        }
    };
    let run = ctx
        .set_status(run_id, &mut |r| r.status = RunStatus::Pending)
        .unwrap_or(run);

    if attempts > ctx.max_attempts {
        let err = EngineError::AttemptsExceeded(run_id.to_string());
        error!("Run {} failed: {}", run_id, err);
        ctx.store.add_run_output(run_id, Value::String(err.to_string()));
        ctx.set_status(run_id, &mut |r| {
            r.status = RunStatus::Error;
            r.interrupt = None;
        });
        ctx.finish_attempt(run_id, false);
        ctx.streams.publish(run_id, &Message::control(ControlSignal::Done));
        ctx.notifier.notify(run_id);
        counter!(RUNS_FINISHED, "status" => RunStatus::Error.as_str()).increment(1);
        return;
    }

    info!("Run {} started (attempt {}/{})", run_id, attempts, ctx.max_attempts);
    let mut bookkeeping = ctx.streams.subscribe(run_id);

    let outcome = AssertUnwindSafe(consume(ctx, &run))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(EngineError::agent(format!("Agent panicked while executing run {}", run_id))));

    match outcome {
        Ok(terminal) => complete(ctx, &run, terminal),
        Err(err) => fail(ctx, &run, attempts, err),
    }

    let mut observed = 0usize;
    while bookkeeping.try_recv().is_some() {
        observed += 1;
    }
    debug!("Run {} attempt {} published {} messages", run_id, attempts, observed);
}

/// Stream the agent's messages, returning the terminal one
async fn consume(ctx: &WorkerContext, run: &Run) -> Result<Option<Message>> {
    let entry = ctx.registry.get(&run.agent_id)?;
    let mut stream = entry.agent.astream(run.clone());
    let mut terminal = None;

    while let Some(item) = stream.next().await {
        let mut message = item?;

        if message.is_control() {
            warn!("Run {}: agent emitted a control message, skipped", run.run_id);
            continue;
        }

        if message.is_interrupt() {
            message.interrupt_name = ctx.validator.resolve_interrupt_name(&run.agent_id, &message)?;
            debug!("Run {} interrupt: {:?}", run.run_id, message.interrupt_name);
            ctx.streams.publish(&run.run_id, &message);
            terminal = Some(message);
            break;
        }

        debug!("Run {} message: {}", run.run_id, message.data);
        ctx.streams.publish(&run.run_id, &message);
        terminal = Some(message);
    }

    if let Some(message) = terminal.as_ref().filter(|m| !m.is_interrupt()) {
        ctx.validator
            .validate_output(&run.run_id, &run.agent_id, &message.data)?;
    }
    Ok(terminal)
}

fn complete(ctx: &WorkerContext, run: &Run, terminal: Option<Message>) {
    let run_id = run.run_id.as_str();
    let (output, interrupt) = match terminal {
        Some(message) if message.is_interrupt() => {
            let interrupt = Interrupt {
                event: message.event.clone(),
                name: message.interrupt_name.clone(),
                ai_data: message.data.clone(),
                user_data: None,
            };
            (message.data, Some(interrupt))
        }
        Some(message) => (message.data, None),
        None => (Value::Null, None),
    };

    let status = if interrupt.is_some() {
        RunStatus::Interrupted
    } else {
        RunStatus::Success
    };

    ctx.store.add_run_output(run_id, output);
    let mut interrupt = interrupt;
    ctx.set_status(run_id, &mut |r| {
        r.status = status;
        r.interrupt = interrupt.take();
    });
    ctx.finish_attempt(run_id, false);
    ctx.streams.publish(run_id, &Message::control(ControlSignal::Done));
    ctx.notifier.notify(run_id);

    counter!(RUNS_FINISHED, "status" => status.as_str()).increment(1);
    match status {
        RunStatus::Interrupted => info!("Run {} interrupted", run_id),
        _ => info!("Run {} succeeded", run_id),
    }
}

fn fail(ctx: &WorkerContext, run: &Run, attempts: u32, err: EngineError) {
    let run_id = run.run_id.as_str();
    let text = err.to_string();
    let retry = attempts < ctx.max_attempts;
    error!("Run {} failed on attempt {}/{}: {}", run_id, attempts, ctx.max_attempts, text);

    ctx.streams.publish(run_id, &Message::error_text(text.clone()));
    ctx.store.add_run_output(run_id, Value::String(text));
    ctx.set_status(run_id, &mut |r| {
        r.status = RunStatus::Error;
        if !retry {
            r.interrupt = None;
        }
    });
    ctx.finish_attempt(run_id, retry);

    if retry {
        ctx.notifier.notify(run_id);
        counter!(RUN_RETRIES).increment(1);
        ctx.queue.push(run_id);
    } else {
        error!("Run {} exhausted its {} attempts", run_id, ctx.max_attempts);
        ctx.streams.publish(run_id, &Message::control(ControlSignal::Done));
        ctx.notifier.notify(run_id);
        counter!(RUNS_FINISHED, "status" => RunStatus::Error.as_str()).increment(1);
    }
}
