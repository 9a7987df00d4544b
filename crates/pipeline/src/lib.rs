//! `scribe-pipeline` — the background generation pipeline.
//!
//! This crate turns submitted generation jobs into committed, indexed memory
//! artifacts:
//!
//! - [`job`]: the job model and its state machine,
//! - [`queue`]: priority task queue with claim-time backoff gating,
//! - [`stage`]: the ordered extract → persist → index → finalize pipeline,
//! - [`retry`]: bounded exponential backoff with error classification,
//! - [`worker`]: the worker pool that drives claimed jobs through stages,
//!   publishing progress at every boundary.
//!
//! The concrete stores, the extraction backend, and the HTTP surface live in
//! sibling crates; everything here works against their seams.

pub mod error;
pub mod job;
pub mod queue;
pub mod retry;
pub mod stage;
pub mod worker;

pub use error::{ErrorKind, ErrorSummary, PipelineError};
pub use job::{Job, JobAttemptRecord, JobPayload, JobState, JobStatusView, Priority};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueStats};
pub use retry::{RetryDecision, RetryPolicy};
pub use stage::Stage;
pub use worker::{PoolStats, TerminalOutcome, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
