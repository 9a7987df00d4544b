//! Notification sink boundary.
//!
//! Terminal job outcomes are announced to an external channel (email, chat,
//! webhook). Delivery is **best-effort**: a sink failure is logged by the
//! caller and never rolls back or fails the job.

use std::sync::Mutex;

/// Sink for terminal outcomes.
///
/// Generic over the outcome type so the pipeline can define its own terminal
/// shape without a dependency cycle.
pub trait NotificationSink<O>: Send + Sync + 'static {
    /// Deliver an outcome. Errors are reduced to a message; the caller only
    /// logs them.
    fn notify(&self, outcome: O) -> Result<(), String>;
}

/// In-memory sink for tests/dev.
#[derive(Debug)]
pub struct InMemoryNotificationSink<O> {
    inner: Mutex<Vec<O>>,
}

impl<O> InMemoryNotificationSink<O> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }
}

impl<O: Clone> InMemoryNotificationSink<O> {
    pub fn all(&self) -> Vec<O> {
        self.inner.lock().unwrap().clone()
    }
}

impl<O> Default for InMemoryNotificationSink<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Send + 'static> NotificationSink<O> for InMemoryNotificationSink<O> {
    fn notify(&self, outcome: O) -> Result<(), String> {
        self.inner.lock().map_err(|_| "sink poisoned".to_string())?.push(outcome);
        Ok(())
    }
}

/// Sink that logs outcomes. The default wiring when no external channel is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl<O: std::fmt::Debug + Send + 'static> NotificationSink<O> for LogNotificationSink {
    fn notify(&self, outcome: O) -> Result<(), String> {
        tracing::info!(outcome = ?outcome, "terminal job outcome");
        Ok(())
    }
}

impl<O, S> NotificationSink<O> for std::sync::Arc<S>
where
    S: NotificationSink<O> + ?Sized,
{
    fn notify(&self, outcome: O) -> Result<(), String> {
        (**self).notify(outcome)
    }
}
