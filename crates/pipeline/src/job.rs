//! Core job model and state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use scribe_core::{JobId, ProjectId};
use scribe_extraction::ConversationInput;
use scribe_memory::MemoryKey;

use crate::error::{ErrorSummary, PipelineError};

/// Dequeue priority. Lower rank dequeues first; within a rank, strict FIFO
/// by enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Typed job payload: one case per job kind, so worker stages pattern-match
/// on a known shape instead of probing an open-ended structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Turn accumulated conversation state into a persisted, indexed memory.
    GenerateMemory { input: ConversationInput },
    /// Remove a memory from both stores (mirror-order delete).
    DeleteMemory { project_id: ProjectId, key: MemoryKey },
}

impl JobPayload {
    pub fn project_id(&self) -> ProjectId {
        match self {
            JobPayload::GenerateMemory { input } => input.project_id,
            JobPayload::DeleteMemory { project_id, .. } => *project_id,
        }
    }

    /// Cheap structural validation, run at submit time and again by the
    /// worker before the first stage. Malformed payloads are terminal.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            JobPayload::GenerateMemory { input } => {
                if input.text.trim().is_empty() {
                    return Err(PipelineError::Validation(
                        "conversation text is empty".to_string(),
                    ));
                }
                Ok(())
            }
            JobPayload::DeleteMemory { .. } => Ok(()),
        }
    }
}

/// Job execution state.
///
/// Transitions: `Queued → Running → { Succeeded | Retrying | Failed }`;
/// `Retrying → Queued` only once the backoff deadline elapses (observed at
/// claim time); `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Retrying { error: ErrorSummary, attempt: u32 },
    Failed { error: ErrorSummary, attempts: u32 },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed { .. })
    }
}

/// Record of one execution attempt, kept for visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<ErrorSummary>,
    pub duration_ms: u64,
}

/// A background generation job.
///
/// A job is owned by exactly one worker for the whole of each attempt; its
/// mutable fields are only ever touched by that worker (and by the queue
/// under its own lock for enqueue/cancel bookkeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub payload: JobPayload,
    pub priority: Priority,
    pub state: JobState,
    /// Attempts started so far (0 before the first claim).
    pub attempt: u32,
    /// Percent complete of the current/last attempt.
    pub percent: u8,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be (re)claimed; used for backoff delays.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Cooperative cancellation flag, checked at stage boundaries.
    pub cancel_requested: bool,
    pub last_error: Option<ErrorSummary>,
    pub history: Vec<JobAttemptRecord>,
}

impl Job {
    pub fn new(payload: JobPayload, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            project_id: payload.project_id(),
            payload,
            priority,
            state: JobState::Queued,
            attempt: 0,
            percent: 0,
            enqueued_at: now,
            updated_at: now,
            scheduled_at: None,
            cancel_requested: false,
            last_error: None,
            history: Vec::new(),
        }
    }

    /// Ready to claim: queued (or past its retry deadline).
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        let claimable = matches!(self.state, JobState::Queued | JobState::Retrying { .. });
        claimable
            && match self.scheduled_at {
                Some(at) => now >= at,
                None => true,
            }
    }

    /// `Queued/Retrying → Running`, incrementing the attempt counter.
    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.attempt += 1;
        self.percent = 0;
        self.scheduled_at = None;
        self.updated_at = Utc::now();
    }

    /// `Running → Succeeded`.
    pub fn mark_succeeded(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.state = JobState::Succeeded;
        self.percent = 100;
        self.updated_at = now;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: true,
            error: None,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    /// `Running → Retrying`, scheduling redelivery after `delay`.
    pub fn mark_retrying(&mut self, error: ErrorSummary, delay: Duration, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.scheduled_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        self.push_failure(error.clone(), started_at, now);
        self.state = JobState::Retrying {
            error,
            attempt: self.attempt,
        };
    }

    /// `Running → Failed` (terminal).
    pub fn mark_failed(&mut self, error: ErrorSummary, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.updated_at = now;
        self.scheduled_at = None;
        self.push_failure(error.clone(), started_at, now);
        self.state = JobState::Failed {
            error,
            attempts: self.attempt,
        };
    }

    fn push_failure(&mut self, error: ErrorSummary, started_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.last_error = Some(error.clone());
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

/// The stable view `get_status` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub state: JobState,
    pub percent: u8,
    pub last_error: Option<ErrorSummary>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state.clone(),
            percent: job.percent,
            last_error: job.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use scribe_core::SourceId;

    fn payload(text: &str) -> JobPayload {
        JobPayload::GenerateMemory {
            input: ConversationInput::new(ProjectId::new(), SourceId::new(), text),
        }
    }

    #[test]
    fn lifecycle_success() {
        let mut job = Job::new(payload("requirement"), Priority::Normal);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 0);

        job.mark_running();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.attempt, 1);

        let started = Utc::now();
        job.mark_succeeded(started);
        assert!(job.state.is_terminal());
        assert_eq!(job.history.len(), 1);
        assert!(job.history[0].success);
    }

    #[test]
    fn retrying_waits_for_backoff() {
        let mut job = Job::new(payload("requirement"), Priority::Normal);
        job.mark_running();
        job.mark_retrying(
            ErrorSummary::new(ErrorKind::Transient, "timeout"),
            Duration::from_secs(60),
            Utc::now(),
        );

        assert!(matches!(job.state, JobState::Retrying { attempt: 1, .. }));
        assert!(!job.is_ready(Utc::now()), "backoff deadline not yet elapsed");
        assert!(job.is_ready(Utc::now() + chrono::Duration::seconds(120)));
    }

    #[test]
    fn failed_is_terminal_and_keeps_summary() {
        let mut job = Job::new(payload("requirement"), Priority::Normal);
        job.mark_running();
        job.mark_failed(ErrorSummary::new(ErrorKind::Validation, "empty"), Utc::now());

        assert!(job.state.is_terminal());
        assert!(!job.is_ready(Utc::now()));
        assert_eq!(job.last_error.as_ref().unwrap().kind, ErrorKind::Validation);
    }

    #[test]
    fn empty_payload_fails_validation() {
        assert!(payload("  ").validate().is_err());
        assert!(payload("fine").validate().is_ok());
    }

    #[test]
    fn priority_ranks_order_high_first() {
        assert!(Priority::High.rank() < Priority::Normal.rank());
        assert!(Priority::Normal.rank() < Priority::Low.rank());
    }
}
