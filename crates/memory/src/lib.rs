//! `scribe-memory` — the dual-store consistency layer.
//!
//! A memory is one logical artifact living in two places at once: a row in a
//! transactional relational store and an entry in an external embedding index
//! that has no transactional relationship to it. This crate owns:
//!
//! - the `MemoryRecord` model and the shared opaque `MemoryKey` linking both
//!   identities,
//! - the `RelationalStore` / `IndexStore` seams with in-memory twins for
//!   tests and dev,
//! - the `DualStoreWriter` prepare/externalize/finalize protocol that keeps
//!   the two stores consistent, and its mirror-order delete.

pub mod record;
pub mod store;
pub mod writer;

pub use record::{MemoryDraft, MemoryKey, MemoryRecord, MemoryRecordId};
pub use store::{
    IndexEntry, IndexError, InMemoryIndexStore, InMemoryRelationalStore, IndexStore,
    RelationalStore, RelationalTransaction, StoreError,
};
pub use writer::{DualStoreWriter, PreparedWrite, WriteError};
