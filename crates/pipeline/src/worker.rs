//! Worker pool: claims jobs and drives them through the stage pipeline.
//!
//! Each worker thread loops `claim → execute stages → write back`, sleeping
//! briefly when the queue has nothing ready. A claimed job is owned by its
//! worker for the whole attempt: stages run strictly in order, progress is
//! published after the claim and at every stage boundary, and cancellation
//! is honored cooperatively at those same boundaries (a running stage is
//! never interrupted mid-flight).
//!
//! Failure handling is classify-then-decide: the stage error's kind plus the
//! retry policy determine whether the job is requeued with a backoff
//! deadline or parked in a terminal `Failed` state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use scribe_core::{JobId, ProjectId};
use scribe_extraction::{Extractor, NotificationSink};
use scribe_memory::{
    DualStoreWriter, IndexStore, MemoryDraft, MemoryKey, RelationalStore, WriteError,
};
use scribe_progress::{ProgressBus, ProgressUpdate};

use crate::error::{ErrorKind, PipelineError};
use crate::job::{Job, JobPayload, JobState};
use crate::queue::JobQueue;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stage::Stage;

/// Terminal result of a job, handed to the notification sink.
#[derive(Debug, Clone)]
pub struct TerminalOutcome {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub state: JobState,
    /// Key of the committed memory, for successful generation jobs.
    pub memory_key: Option<MemoryKey>,
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// Sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Upper bound on a single extraction call.
    pub extract_timeout: Duration,
    /// Upper bound on each dual-store stage (prepare, index+commit, delete).
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(50),
            extract_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for what the pool has processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Everything a worker thread needs, shared across the pool.
struct WorkerContext<Q, X, R, I, S> {
    queue: Q,
    extractor: Arc<X>,
    writer: DualStoreWriter<R, I>,
    bus: Arc<ProgressBus>,
    sink: S,
    retry: RetryPolicy,
    extract_timeout: Duration,
    store_timeout: Duration,
    stats: Mutex<PoolStats>,
}

/// A pool of worker threads over one queue.
pub struct WorkerPool<Q, X, R, I, S> {
    ctx: Arc<WorkerContext<Q, X, R, I, S>>,
    config: WorkerPoolConfig,
}

/// Handle to a started pool. Call `shutdown` to stop the workers; in-flight
/// attempts run to completion first.
pub struct WorkerPoolHandle {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<dyn Fn() -> PoolStats + Send + Sync>,
}

impl WorkerPoolHandle {
    pub fn stats(&self) -> PoolStats {
        (self.stats)()
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl<Q, X, R, I, S> WorkerPool<Q, X, R, I, S>
where
    Q: JobQueue + 'static,
    X: Extractor,
    R: RelationalStore + Clone,
    I: IndexStore + Clone,
    S: NotificationSink<TerminalOutcome>,
{
    pub fn new(
        config: WorkerPoolConfig,
        queue: Q,
        extractor: X,
        writer: DualStoreWriter<R, I>,
        bus: Arc<ProgressBus>,
        sink: S,
    ) -> Self {
        let ctx = Arc::new(WorkerContext {
            queue,
            extractor: Arc::new(extractor),
            writer,
            bus,
            sink,
            retry: config.retry.clone(),
            extract_timeout: config.extract_timeout,
            store_timeout: config.store_timeout,
            stats: Mutex::new(PoolStats::default()),
        });
        Self { ctx, config }
    }

    /// Spawn the worker threads and return the running pool's handle.
    pub fn start(self) -> WorkerPoolHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(self.config.workers.max(1));

        for worker_id in 0..self.config.workers.max(1) {
            let ctx = Arc::clone(&self.ctx);
            let stop = Arc::clone(&stop);
            let poll_interval = self.config.poll_interval;
            workers.push(thread::spawn(move || {
                worker_loop(worker_id, ctx, stop, poll_interval);
            }));
        }

        info!(workers = workers.len(), "worker pool started");
        let ctx = self.ctx;
        WorkerPoolHandle {
            stop,
            workers,
            stats: Arc::new(move || ctx.stats.lock().map(|s| s.clone()).unwrap_or_default()),
        }
    }
}

fn worker_loop<Q, X, R, I, S>(
    worker_id: usize,
    ctx: Arc<WorkerContext<Q, X, R, I, S>>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) where
    Q: JobQueue + 'static,
    X: Extractor,
    R: RelationalStore + Clone,
    I: IndexStore + Clone,
    S: NotificationSink<TerminalOutcome>,
{
    debug!(worker_id, "worker started");
    while !stop.load(Ordering::SeqCst) {
        match ctx.queue.claim_next() {
            Ok(Some(job)) => run_attempt(&ctx, job),
            Ok(None) => thread::sleep(poll_interval),
            Err(err) => {
                warn!(worker_id, error = %err, "claim failed");
                thread::sleep(poll_interval);
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

/// One full attempt of a claimed job: stage execution, then the
/// success/retry/fail bookkeeping.
fn run_attempt<Q, X, R, I, S>(ctx: &Arc<WorkerContext<Q, X, R, I, S>>, mut job: Job)
where
    Q: JobQueue + 'static,
    X: Extractor,
    R: RelationalStore + Clone,
    I: IndexStore + Clone,
    S: NotificationSink<TerminalOutcome>,
{
    let started = Utc::now();
    bump_stats(ctx, |s| s.claimed += 1);
    debug!(job_id = %job.id, attempt = job.attempt, "attempt started");

    publish(
        ctx,
        &job,
        "running",
        0,
        json!({ "state": "running", "attempt": job.attempt }),
    );

    match execute_stages(ctx, &mut job) {
        Ok(memory_key) => {
            job.mark_succeeded(started);
            write_back(ctx, &job);
            publish(
                ctx,
                &job,
                Stage::Finalize.name(),
                100,
                json!({ "state": "succeeded" }),
            );
            bump_stats(ctx, |s| s.succeeded += 1);
            info!(job_id = %job.id, attempts = job.attempt, "job succeeded");
            notify(ctx, &job, memory_key);
        }
        Err(err) => finish_failed_attempt(ctx, job, err, started),
    }
}

fn finish_failed_attempt<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    mut job: Job,
    err: PipelineError,
    started: chrono::DateTime<Utc>,
) where
    Q: JobQueue + 'static,
    X: Extractor,
    R: RelationalStore,
    I: IndexStore,
    S: NotificationSink<TerminalOutcome>,
{
    let summary = err.summary();
    let percent = job.percent;

    match ctx.retry.decide(summary.kind, job.attempt) {
        RetryDecision::Retry { delay } => {
            job.mark_retrying(summary.clone(), delay, started);
            write_back(ctx, &job);
            publish(
                ctx,
                &job,
                "retrying",
                percent,
                json!({
                    "state": "retrying",
                    "attempt": job.attempt,
                    "error": &summary,
                    "retry_in_ms": delay.as_millis() as u64,
                }),
            );
            bump_stats(ctx, |s| s.retried += 1);
            warn!(
                job_id = %job.id,
                attempt = job.attempt,
                kind = ?summary.kind,
                error = %summary.reason,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, job requeued"
            );
        }
        RetryDecision::GiveUp => {
            job.mark_failed(summary.clone(), started);
            write_back(ctx, &job);
            publish(
                ctx,
                &job,
                "failed",
                percent,
                json!({ "state": "failed", "error": &summary }),
            );
            if summary.kind == ErrorKind::Cancelled {
                bump_stats(ctx, |s| s.cancelled += 1);
            } else {
                bump_stats(ctx, |s| s.failed += 1);
            }
            warn!(
                job_id = %job.id,
                attempts = job.attempt,
                kind = ?summary.kind,
                error = %summary.reason,
                "job failed terminally"
            );
            notify(ctx, &job, None);
        }
    }
}

/// Drive the payload through its stages. Returns the committed memory key
/// for generation jobs.
///
/// Every stage runs under a wall-clock bound: a hung collaborator (model
/// service, database, index) surfaces as a transient timeout instead of
/// pinning the worker, and the abandoned helper's transaction rolls back
/// on drop.
fn execute_stages<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    job: &mut Job,
) -> Result<Option<MemoryKey>, PipelineError>
where
    Q: JobQueue + 'static,
    X: Extractor,
    R: RelationalStore + Clone,
    I: IndexStore + Clone,
    S: NotificationSink<TerminalOutcome>,
{
    check_cancel(ctx, job.id)?;
    job.payload.validate()?;

    match job.payload.clone() {
        JobPayload::GenerateMemory { input } => {
            let project_id = input.project_id;
            let source_id = input.source_id;

            let extractor = Arc::clone(&ctx.extractor);
            let fields = run_with_timeout(ctx.extract_timeout, move || {
                extractor.extract(&input).map_err(PipelineError::from)
            })?;
            advance(ctx, job, Stage::Extract, json!({ "content_len": fields.content.len() }));
            check_cancel(ctx, job.id)?;

            // Persist: open the transaction and stage the row.
            let writer = ctx.writer.clone();
            let prepared = run_with_timeout(ctx.store_timeout, move || {
                let version = next_version(&writer, project_id, source_id)?;
                let draft = MemoryDraft::new(project_id, source_id, fields.content)
                    .with_attributes(fields.attributes);
                writer.prepare(draft, version).map_err(PipelineError::from)
            })?;
            let key = prepared.record().key;
            let version = prepared.record().version;
            advance(
                ctx,
                job,
                Stage::Persist,
                json!({ "memory_key": key, "version": version }),
            );

            // A cancel here drops the prepared transaction, rolling it back.
            check_cancel(ctx, job.id)?;

            // Index + finalize: externalize to the index, then commit.
            let writer = ctx.writer.clone();
            let record = run_with_timeout(ctx.store_timeout, move || {
                writer.externalize_and_commit(prepared).map_err(PipelineError::from)
            })?;
            advance(ctx, job, Stage::Index, json!({ "indexed": true }));

            Ok(Some(record.key))
        }
        JobPayload::DeleteMemory { key, .. } => {
            let writer = ctx.writer.clone();
            let existed = run_with_timeout(ctx.store_timeout, move || {
                writer.delete(&key).map_err(PipelineError::from)
            })?;
            advance(
                ctx,
                job,
                Stage::Persist,
                json!({ "deleted": existed, "memory_key": key }),
            );
            Ok(None)
        }
    }
}

/// Next revision number for a source: one past the committed records it
/// already has.
fn next_version<R, I>(
    writer: &DualStoreWriter<R, I>,
    project_id: ProjectId,
    source_id: scribe_core::SourceId,
) -> Result<u32, PipelineError>
where
    R: RelationalStore,
    I: IndexStore,
{
    let prior = writer
        .relational()
        .list_by_project(project_id)
        .map_err(WriteError::from)?
        .iter()
        .filter(|r| r.source_id == source_id)
        .count() as u32;
    Ok(prior + 1)
}

fn check_cancel<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    job_id: JobId,
) -> Result<(), PipelineError>
where
    Q: JobQueue + 'static,
{
    let requested = ctx
        .queue
        .cancel_requested(job_id)
        .map_err(|e| PipelineError::Fatal(e.to_string()))?;
    if requested {
        return Err(PipelineError::Cancelled(
            "cancellation requested".to_string(),
        ));
    }
    Ok(())
}

/// Record stage completion on the job, surface it through the queue so
/// status queries see the fresh percent, and publish the boundary event.
fn advance<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    job: &mut Job,
    stage: Stage,
    patch: serde_json::Value,
) where
    Q: JobQueue + 'static,
{
    job.percent = stage.percent_complete();
    job.updated_at = Utc::now();
    write_back(ctx, job);
    publish(ctx, job, stage.name(), stage.percent_complete(), patch);
}

fn publish<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    job: &Job,
    stage: &str,
    percent: u8,
    patch: serde_json::Value,
) {
    let update = ProgressUpdate::new(job.id, job.project_id, stage, percent, patch);
    if let Err(err) = ctx.bus.publish(update) {
        warn!(job_id = %job.id, error = %err, "progress publish failed");
    }
}

fn write_back<Q, X, R, I, S>(ctx: &Arc<WorkerContext<Q, X, R, I, S>>, job: &Job)
where
    Q: JobQueue + 'static,
{
    if let Err(err) = ctx.queue.update(job) {
        warn!(job_id = %job.id, error = %err, "queue write-back failed");
    }
}

fn notify<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    job: &Job,
    memory_key: Option<MemoryKey>,
) where
    S: NotificationSink<TerminalOutcome>,
{
    let outcome = TerminalOutcome {
        job_id: job.id,
        project_id: job.project_id,
        state: job.state.clone(),
        memory_key,
    };
    // Best effort: a sink failure never affects the job.
    if let Err(err) = ctx.sink.notify(outcome) {
        warn!(job_id = %job.id, error = %err, "terminal notification failed");
    }
}

fn bump_stats<Q, X, R, I, S>(
    ctx: &Arc<WorkerContext<Q, X, R, I, S>>,
    f: impl FnOnce(&mut PoolStats),
) {
    if let Ok(mut stats) = ctx.stats.lock() {
        f(&mut stats);
    }
}

/// Run `f` on a helper thread, bounding the wait. On timeout the helper is
/// detached (its eventual result is discarded) and the caller sees a
/// transient error.
fn run_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Transient("stage timed out".to_string())),
    }
}
