//! The progress event bus.
//!
//! Per-job publish/subscribe with:
//!
//! - strict per-job sequence numbering (single writer per job),
//! - a bounded in-memory replay window (default 50 events per job),
//! - full-state snapshot fallback for cursors older than the window,
//! - broadcast fan-out to job-scoped and project-scoped subscribers,
//! - immediate teardown of disconnected subscribers (no buffering for the
//!   dead; the dead are pruned on the next publish).
//!
//! Delivery is at-least-once per subscriber connection; consumers dedup by
//! sequence number.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use scribe_core::{JobId, ProjectId};

use crate::event::{JobSnapshot, ProgressEvent, ProgressUpdate, merge_patch};

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Catch-up state for a cursor older than the retained window. Live
    /// events continue from `snapshot.seq + 1`.
    Snapshot(JobSnapshot),
    /// A sequenced incremental event.
    Event(ProgressEvent),
}

impl Delivery {
    /// The sequence number this delivery advances the consumer's cursor to.
    pub fn seq(&self) -> u64 {
        match self {
            Delivery::Snapshot(s) => s.seq,
            Delivery::Event(e) => e.seq,
        }
    }
}

/// Bus error.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress bus registry poisoned")]
    Poisoned,
}

/// A live subscription handle.
///
/// Dropping the subscription tears it down: its slot is marked closed so
/// the bus can reclaim it on the next publish or subscribe, whichever
/// comes first.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Delivery>,
    closed: Arc<AtomicBool>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl Subscription {
    /// Block until the next delivery.
    pub fn recv(&self) -> Result<Delivery, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive without blocking.
    pub fn try_recv(&self) -> Result<Delivery, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a delivery.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Delivery, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct ProgressBusConfig {
    /// Events retained per job for replay.
    pub retain: usize,
}

impl Default for ProgressBusConfig {
    fn default() -> Self {
        Self { retain: 50 }
    }
}

impl ProgressBusConfig {
    pub fn with_retain(mut self, retain: usize) -> Self {
        self.retain = retain;
        self
    }
}

/// One subscriber's sender plus its liveness flag. The flag lets the bus
/// notice a dropped `Subscription` without sending anything.
#[derive(Debug)]
struct SubscriberSlot {
    tx: mpsc::Sender<Delivery>,
    closed: Arc<AtomicBool>,
}

impl SubscriberSlot {
    fn new() -> (Self, Subscription) {
        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let slot = Self {
            tx,
            closed: Arc::clone(&closed),
        };
        (slot, Subscription { receiver: rx, closed })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn send(&self, delivery: Delivery) -> bool {
        !self.is_closed() && self.tx.send(delivery).is_ok()
    }
}

#[derive(Debug)]
struct JobChannel {
    project_id: Option<ProjectId>,
    /// Next sequence number to assign (sequences start at 1).
    next_seq: u64,
    window: VecDeque<ProgressEvent>,
    /// All patches folded together, for snapshot fallback.
    state: JsonValue,
    last_stage: String,
    last_percent: u8,
    subscribers: Vec<SubscriberSlot>,
}

impl JobChannel {
    fn new() -> Self {
        Self {
            project_id: None,
            next_seq: 1,
            window: VecDeque::new(),
            state: JsonValue::Null,
            last_stage: String::new(),
            last_percent: 0,
            subscribers: Vec::new(),
        }
    }

    fn latest_seq(&self) -> u64 {
        self.next_seq - 1
    }

    fn snapshot(&self, job_id: JobId, project_id: ProjectId) -> JobSnapshot {
        JobSnapshot {
            job_id,
            project_id,
            seq: self.latest_seq(),
            stage: self.last_stage.clone(),
            percent: self.last_percent,
            state: self.state.clone(),
        }
    }
}

/// Ordered, per-job progress distribution.
#[derive(Debug)]
pub struct ProgressBus {
    retain: usize,
    jobs: Mutex<HashMap<JobId, JobChannel>>,
    projects: Mutex<HashMap<ProjectId, Vec<SubscriberSlot>>>,
}

impl ProgressBus {
    pub fn new(config: ProgressBusConfig) -> Self {
        Self {
            retain: config.retain.max(1),
            jobs: Mutex::new(HashMap::new()),
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an update for a job. Called only by the job's owning worker.
    ///
    /// Assigns and returns the event's sequence number.
    pub fn publish(&self, update: ProgressUpdate) -> Result<u64, ProgressError> {
        let job_id = update.job_id;
        let project_id = update.project_id;

        let event = {
            let mut jobs = self.jobs.lock().map_err(|_| ProgressError::Poisoned)?;
            let channel = jobs.entry(job_id).or_insert_with(JobChannel::new);
            channel.project_id = Some(project_id);

            let seq = channel.next_seq;
            channel.next_seq += 1;

            let event = ProgressEvent::from_update(update, seq);
            merge_patch(&mut channel.state, &event.patch);
            channel.last_stage = event.stage.clone();
            channel.last_percent = event.percent;

            channel.window.push_back(event.clone());
            while channel.window.len() > self.retain {
                channel.window.pop_front();
            }

            channel
                .subscribers
                .retain(|slot| slot.send(Delivery::Event(event.clone())));

            event
        };

        let mut projects = self.projects.lock().map_err(|_| ProgressError::Poisoned)?;
        if let Some(subs) = projects.get_mut(&project_id) {
            subs.retain(|slot| slot.send(Delivery::Event(event.clone())));
            if subs.is_empty() {
                projects.remove(&project_id);
            }
        }

        debug!(job_id = %job_id, seq = event.seq, stage = %event.stage, "progress published");
        Ok(event.seq)
    }

    /// Subscribe to one job's stream from a cursor.
    ///
    /// Returns the catch-up backlog (events with `seq >= from_seq` still
    /// retained, or a single full-state snapshot when the cursor precedes
    /// the window) plus the live subscription.
    pub fn subscribe_job(
        &self,
        job_id: JobId,
        from_seq: u64,
    ) -> Result<(Vec<Delivery>, Subscription), ProgressError> {
        let mut jobs = self.jobs.lock().map_err(|_| ProgressError::Poisoned)?;

        // Reclaim channels that never published and whose subscribers have
        // all gone away. Without this, subscriptions to arbitrary job ids
        // would grow the registry without bound.
        jobs.retain(|_, ch| ch.next_seq > 1 || ch.subscribers.iter().any(|s| !s.is_closed()));

        let channel = jobs.entry(job_id).or_insert_with(JobChannel::new);

        let from = from_seq.max(1);
        let latest = channel.latest_seq();

        let backlog: Vec<Delivery> = if latest == 0 || from > latest {
            Vec::new()
        } else {
            let oldest_retained = channel.window.front().map(|e| e.seq).unwrap_or(latest + 1);
            if from < oldest_retained {
                // The cursor has aged out of the window: one snapshot
                // replaces every missed patch.
                let project_id = channel.project_id.unwrap_or_default();
                vec![Delivery::Snapshot(channel.snapshot(job_id, project_id))]
            } else {
                channel
                    .window
                    .iter()
                    .filter(|e| e.seq >= from)
                    .cloned()
                    .map(Delivery::Event)
                    .collect()
            }
        };

        let (slot, subscription) = SubscriberSlot::new();
        channel.subscribers.push(slot);

        Ok((backlog, subscription))
    }

    /// Subscribe to live events for every job of a project.
    ///
    /// Project scope carries no per-job cursor, so there is no backlog:
    /// delivery starts with the next published event.
    pub fn subscribe_project(&self, project_id: ProjectId) -> Result<Subscription, ProgressError> {
        let mut projects = self.projects.lock().map_err(|_| ProgressError::Poisoned)?;

        // Same reclaim as the job scope: drop fan-out lists whose
        // subscribers all disconnected before anything was published.
        projects.retain(|_, subs| {
            subs.retain(|s| !s.is_closed());
            !subs.is_empty()
        });

        let (slot, subscription) = SubscriberSlot::new();
        projects.entry(project_id).or_default().push(slot);
        Ok(subscription)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(ProgressBusConfig::default())
    }
}
