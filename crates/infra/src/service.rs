//! The assembled generation service: queue, worker pool, progress bus.
//!
//! This is the one object the HTTP surface talks to. It validates and
//! enqueues jobs, answers status queries, forwards cancellation, and hands
//! out progress subscriptions. The worker pool behind it runs until
//! `shutdown`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use scribe_core::{JobId, ProjectId};
use scribe_extraction::{Extractor, NotificationSink};
use scribe_memory::{DualStoreWriter, IndexStore, RelationalStore};
use scribe_pipeline::{
    InMemoryJobQueue, Job, JobPayload, JobQueue, JobStatusView, PoolStats, Priority, QueueError,
    QueueStats, RetryPolicy, TerminalOutcome, WorkerPool, WorkerPoolConfig, WorkerPoolHandle,
};
use scribe_progress::{Delivery, ProgressBus, ProgressBusConfig, ProgressError, Subscription};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct GenerationServiceConfig {
    pub workers: usize,
    /// Progress events retained per job for replay.
    pub retain: usize,
    pub poll_interval: Duration,
    pub extract_timeout: Duration,
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GenerationServiceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retain: 50,
            poll_interval: Duration::from_millis(50),
            extract_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Submission failure.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid job payload: {0}")]
    Invalid(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Running generation backend.
pub struct GenerationService {
    queue: Arc<InMemoryJobQueue>,
    bus: Arc<ProgressBus>,
    pool: WorkerPoolHandle,
}

impl GenerationService {
    /// Wire the queue, bus and worker pool together and start the workers.
    pub fn start<X, R, I, S>(
        config: GenerationServiceConfig,
        extractor: X,
        relational: R,
        index: I,
        sink: S,
    ) -> Self
    where
        X: Extractor,
        R: RelationalStore + Clone,
        I: IndexStore + Clone,
        S: NotificationSink<TerminalOutcome>,
    {
        let queue = InMemoryJobQueue::arc();
        let bus = Arc::new(ProgressBus::new(
            ProgressBusConfig::default().with_retain(config.retain),
        ));

        let pool = WorkerPool::new(
            WorkerPoolConfig {
                workers: config.workers,
                poll_interval: config.poll_interval,
                extract_timeout: config.extract_timeout,
                store_timeout: config.store_timeout,
                retry: config.retry,
            },
            Arc::clone(&queue),
            extractor,
            DualStoreWriter::new(relational, index),
            Arc::clone(&bus),
            sink,
        )
        .start();

        info!(workers = config.workers, "generation service started");
        Self { queue, bus, pool }
    }

    /// Validate and enqueue a job. Returns its id immediately; execution is
    /// asynchronous.
    pub fn submit(&self, payload: JobPayload, priority: Priority) -> Result<JobId, SubmitError> {
        payload
            .validate()
            .map_err(|e| SubmitError::Invalid(e.to_string()))?;
        let job = Job::new(payload, priority);
        Ok(self.queue.enqueue(job)?)
    }

    pub fn status(&self, job_id: JobId) -> Result<Option<JobStatusView>, QueueError> {
        self.queue.status(job_id)
    }

    /// Request cooperative cancellation. True if the job exists and was not
    /// already terminal.
    pub fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        self.queue.cancel(job_id)
    }

    /// Subscribe to one job's progress from a sequence cursor.
    pub fn subscribe_job(
        &self,
        job_id: JobId,
        from_seq: u64,
    ) -> Result<(Vec<Delivery>, Subscription), ProgressError> {
        self.bus.subscribe_job(job_id, from_seq)
    }

    /// Subscribe to live progress for every job of a project.
    pub fn subscribe_project(&self, project_id: ProjectId) -> Result<Subscription, ProgressError> {
        self.bus.subscribe_project(project_id)
    }

    pub fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        self.queue.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop the workers; in-flight attempts run to completion first.
    pub fn shutdown(self) {
        self.pool.shutdown();
        info!("generation service stopped");
    }
}
