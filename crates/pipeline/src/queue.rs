//! Task queue: priority-aware FIFO of pending generation jobs.
//!
//! The queue is the only cross-worker coordination point. Claiming marks a
//! job `Running` under the queue lock, which is what makes single ownership
//! hold: no two workers can claim the same job, and an owned job is never
//! redelivered until its owner parks it back via `update` in a claimable
//! state.
//!
//! Backoff never parks a worker thread: `mark_retrying` stamps a deadline
//! on the job and claim-time readiness checks do the rest.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use thiserror::Error;

use scribe_core::JobId;

use crate::job::{Job, JobState, JobStatusView};

/// Queue error.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-state job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Queue seam used by the worker pool and the service layer.
pub trait JobQueue: Send + Sync {
    /// Add a new job. The job must be in `Queued` state.
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Claim the next ready job: highest priority first, FIFO within a
    /// priority, retry deadlines respected. Marks the job `Running`.
    fn claim_next(&self) -> Result<Option<Job>, QueueError>;

    /// Write back the owning worker's copy of a job.
    fn update(&self, job: &Job) -> Result<(), QueueError>;

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError>;

    /// Stable status view for `get_status`.
    fn status(&self, job_id: JobId) -> Result<Option<JobStatusView>, QueueError>;

    /// Request cooperative cancellation. Returns false for unknown or
    /// already-terminal jobs; the flag takes effect at the owning worker's
    /// next stage boundary.
    fn cancel(&self, job_id: JobId) -> Result<bool, QueueError>;

    /// Whether cancellation has been requested (authoritative; the worker
    /// consults this at stage boundaries rather than its own stale copy).
    fn cancel_requested(&self, job_id: JobId) -> Result<bool, QueueError>;

    fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// In-memory queue (tests/dev, and the default single-process deployment).
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> QueueError {
    QueueError::Storage("queue lock poisoned".to_string())
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let now = Utc::now();

        let next_id = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.priority.rank(), j.enqueued_at, j.id.as_uuid().as_bytes().to_owned()))
            .map(|j| j.id);

        if let Some(id) = next_id {
            if let Some(job) = jobs.get_mut(&id) {
                job.mark_running();
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    fn update(&self, job: &Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let stored = jobs.get_mut(&job.id).ok_or(QueueError::NotFound(job.id))?;
        // The cancel flag belongs to the queue, not the owning worker.
        let cancel_requested = stored.cancel_requested;
        *stored = job.clone();
        stored.cancel_requested |= cancel_requested;
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn status(&self, job_id: JobId) -> Result<Option<JobStatusView>, QueueError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).map(JobStatusView::from))
    }

    fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        match jobs.get_mut(&job_id) {
            Some(job) if !job.state.is_terminal() => {
                job.cancel_requested = true;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn cancel_requested(&self, job_id: JobId) -> Result<bool, QueueError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&job_id).map(|j| j.cancel_requested).unwrap_or(false))
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match &job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Running => stats.running += 1,
                JobState::Retrying { .. } => stats.retrying += 1,
                JobState::Succeeded => stats.succeeded += 1,
                JobState::Failed { .. } => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

impl<Q> JobQueue for Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job)
    }

    fn claim_next(&self) -> Result<Option<Job>, QueueError> {
        (**self).claim_next()
    }

    fn update(&self, job: &Job) -> Result<(), QueueError> {
        (**self).update(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        (**self).get(job_id)
    }

    fn status(&self, job_id: JobId) -> Result<Option<JobStatusView>, QueueError> {
        (**self).status(job_id)
    }

    fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        (**self).cancel(job_id)
    }

    fn cancel_requested(&self, job_id: JobId) -> Result<bool, QueueError> {
        (**self).cancel_requested(job_id)
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ErrorSummary};
    use crate::job::{JobPayload, Priority};
    use scribe_core::{ProjectId, SourceId};
    use scribe_extraction::ConversationInput;
    use std::time::Duration;

    fn job(priority: Priority) -> Job {
        Job::new(
            JobPayload::GenerateMemory {
                input: ConversationInput::new(ProjectId::new(), SourceId::new(), "text"),
            },
            priority,
        )
    }

    #[test]
    fn enqueue_and_claim() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(job(Priority::Normal)).unwrap();

        let claimed = queue.claim_next().unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, JobState::Running);
        assert_eq!(claimed.attempt, 1);

        // The claimed job is owned; nothing else to claim.
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn high_priority_jumps_the_line() {
        let queue = InMemoryJobQueue::new();
        let low = queue.enqueue(job(Priority::Low)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let high = queue.enqueue(job(Priority::High)).unwrap();

        assert_eq!(queue.claim_next().unwrap().unwrap().id, high);
        assert_eq!(queue.claim_next().unwrap().unwrap().id, low);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let queue = InMemoryJobQueue::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(queue.enqueue(job(Priority::Normal)).unwrap());
            std::thread::sleep(Duration::from_millis(2));
        }

        for expected in ids {
            assert_eq!(queue.claim_next().unwrap().unwrap().id, expected);
        }
    }

    #[test]
    fn backoff_deadline_gates_redelivery() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(job(Priority::Normal)).unwrap();

        let mut claimed = queue.claim_next().unwrap().unwrap();
        claimed.mark_retrying(
            ErrorSummary::new(ErrorKind::Transient, "timeout"),
            Duration::from_secs(60),
            Utc::now(),
        );
        queue.update(&claimed).unwrap();

        // Deadline in the future: not redelivered.
        assert!(queue.claim_next().unwrap().is_none());

        claimed.scheduled_at = Some(Utc::now() - chrono::Duration::seconds(1));
        queue.update(&claimed).unwrap();
        let redelivered = queue.claim_next().unwrap().unwrap();
        assert_eq!(redelivered.attempt, 2);
    }

    #[test]
    fn cancel_sets_flag_and_survives_worker_updates() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(job(Priority::Normal)).unwrap();
        let claimed = queue.claim_next().unwrap().unwrap();

        assert!(queue.cancel(id).unwrap());
        // The worker writes back its stale copy; the flag must not be lost.
        queue.update(&claimed).unwrap();
        assert!(queue.cancel_requested(id).unwrap());
    }

    #[test]
    fn cancel_of_terminal_or_unknown_job_is_false() {
        let queue = InMemoryJobQueue::new();
        assert!(!queue.cancel(JobId::new()).unwrap());

        let id = queue.enqueue(job(Priority::Normal)).unwrap();
        let mut claimed = queue.claim_next().unwrap().unwrap();
        claimed.mark_succeeded(Utc::now());
        queue.update(&claimed).unwrap();
        assert!(!queue.cancel(id).unwrap());
    }

    #[test]
    fn stats_track_states() {
        let queue = InMemoryJobQueue::new();
        for _ in 0..3 {
            queue.enqueue(job(Priority::Normal)).unwrap();
        }
        queue.claim_next().unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.running, 1);
    }
}
