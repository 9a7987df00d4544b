//! `scribe-progress` — ordered progress-event distribution.
//!
//! Each running job publishes incremental state patches; every live
//! subscriber observes them in strict per-job sequence order, and a
//! late-joining subscriber either replays the retained tail or receives a
//! full-state snapshot when its cursor has aged out of the window.
//!
//! The per-job sequence counter has a single writer (the job's owning
//! worker), so sequence assignment needs no coordination beyond the bus's
//! own registry lock.

pub mod bus;
pub mod event;

pub use bus::{Delivery, ProgressBus, ProgressBusConfig, ProgressError, Subscription};
pub use event::{JobSnapshot, ProgressEvent, ProgressUpdate};
