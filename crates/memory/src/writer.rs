//! Dual-store writer.
//!
//! Makes a logically atomic write across the relational store and the
//! external index:
//!
//! 1. **Prepare**: open a relational transaction, insert the record, flush.
//!    The identity exists but is visible only inside the transaction.
//! 2. **Externalize**: store the index entry under the shared key.
//! 3. **Finalize**: commit the relational transaction if the index write
//!    succeeded; roll back and surface a consistency error if it did not.
//!
//! Guarantee: a committed relational row always implies an index write that
//! succeeded at commit time. The index may hold an orphaned entry if the
//! relational commit itself fails after a successful index write; that
//! orphan is accepted and reconciled out-of-band.
//!
//! Deletion mirrors the order: relational delete commits first, then the
//! index delete runs; an index-delete failure leaves an accepted orphan.

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use crate::record::{MemoryDraft, MemoryKey, MemoryRecord};
use crate::store::{IndexError, IndexStore, RelationalStore, RelationalTransaction, StoreError};

/// Dual-store write failure.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The relational side failed (begin, insert, flush, commit, or delete).
    #[error("relational store error: {0}")]
    Relational(#[from] StoreError),

    /// The index write failed after the relational prepare; the transaction
    /// was rolled back. The whole prepare/externalize/finalize sequence must
    /// be retried as a unit.
    #[error("index write failed for key {key}, relational transaction rolled back: {reason}")]
    Consistency { key: MemoryKey, reason: String },
}

impl WriteError {
    /// Whether a retry of the whole write sequence can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            WriteError::Consistency { .. } => true,
            WriteError::Relational(StoreError::Storage(_)) => true,
            WriteError::Relational(_) => false,
        }
    }
}

/// A prepared-but-uncommitted write: the open transaction plus the record it
/// staged. Produced by `prepare`, consumed by `externalize_and_commit`.
pub struct PreparedWrite<T: RelationalTransaction> {
    tx: T,
    record: MemoryRecord,
}

impl<T: RelationalTransaction> PreparedWrite<T> {
    /// The staged record (identity assigned, not yet durable).
    pub fn record(&self) -> &MemoryRecord {
        &self.record
    }
}

/// The prepare/externalize/finalize protocol over a relational store and an
/// external index.
#[derive(Clone)]
pub struct DualStoreWriter<R, I> {
    relational: R,
    index: I,
}

impl<R, I> DualStoreWriter<R, I>
where
    R: RelationalStore,
    I: IndexStore,
{
    pub fn new(relational: R, index: I) -> Self {
        Self { relational, index }
    }

    pub fn relational(&self) -> &R {
        &self.relational
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// Step 1: open a transaction, stage the record, flush.
    pub fn prepare(
        &self,
        draft: MemoryDraft,
        version: u32,
    ) -> Result<PreparedWrite<R::Tx>, WriteError> {
        let record = MemoryRecord::from_draft(draft, version);

        let mut tx = self.relational.begin()?;
        tx.insert(record.clone())?;
        tx.flush()?;

        debug!(key = %record.key, record_id = %record.id, "relational row prepared");
        Ok(PreparedWrite { tx, record })
    }

    /// Steps 2 and 3: write the index entry, then commit the relational
    /// transaction. On index failure the transaction is rolled back and a
    /// `Consistency` error is surfaced.
    pub fn externalize_and_commit(
        &self,
        prepared: PreparedWrite<R::Tx>,
    ) -> Result<MemoryRecord, WriteError> {
        let PreparedWrite { tx, record } = prepared;

        let metadata = index_metadata(&record);
        if let Err(err) = self.index.store(&record.key, &record.content, &metadata) {
            let reason = err.to_string();
            warn!(key = %record.key, error = %reason, "index write failed, rolling back relational transaction");
            if let Err(rb) = tx.rollback() {
                // The transaction is abandoned either way; nothing is committed.
                warn!(key = %record.key, error = %rb, "rollback after failed index write also failed");
            }
            return Err(WriteError::Consistency {
                key: record.key,
                reason,
            });
        }

        // A commit failure here leaves an orphaned index entry. Accepted:
        // the relational store stays clean and the orphan is reconciled
        // out-of-band.
        tx.commit().map_err(|e| {
            warn!(key = %record.key, error = %e, "relational commit failed after successful index write, index entry orphaned");
            WriteError::Relational(e)
        })?;

        debug!(key = %record.key, record_id = %record.id, version = record.version, "memory committed to both stores");
        Ok(record)
    }

    /// The full three-step sequence in one call.
    pub fn write(&self, draft: MemoryDraft, version: u32) -> Result<MemoryRecord, WriteError> {
        let prepared = self.prepare(draft, version)?;
        self.externalize_and_commit(prepared)
    }

    /// Mirror-order delete: relational first (abort if it fails), then the
    /// index. An index-delete failure after the committed relational delete
    /// is logged as an accepted orphan, never retried here.
    ///
    /// Returns whether a relational row existed.
    pub fn delete(&self, key: &MemoryKey) -> Result<bool, WriteError> {
        let mut tx = self.relational.begin()?;
        let existed = tx.delete(key)?;
        tx.commit()?;

        if !existed {
            return Ok(false);
        }

        match self.index.delete(key) {
            Ok(()) => debug!(key = %key, "memory deleted from both stores"),
            Err(IndexError::Unavailable(reason)) | Err(IndexError::Rejected(reason)) => {
                warn!(key = %key, error = %reason, "index delete failed after relational delete, index entry orphaned");
            }
        }
        Ok(true)
    }
}

fn index_metadata(record: &MemoryRecord) -> JsonValue {
    serde_json::json!({
        "project_id": record.project_id,
        "source_id": record.source_id,
        "record_id": record.id,
        "version": record.version,
        "created_at": record.created_at.to_rfc3339(),
        "attributes": record.attributes,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::store::{InMemoryIndexStore, InMemoryRelationalStore};
    use scribe_core::{ProjectId, SourceId};

    /// Index store that fails the first `failures` store calls.
    struct FlakyIndex {
        inner: InMemoryIndexStore,
        failures: AtomicU32,
    }

    impl FlakyIndex {
        fn failing(failures: u32) -> Self {
            Self {
                inner: InMemoryIndexStore::new(),
                failures: AtomicU32::new(failures),
            }
        }
    }

    impl IndexStore for FlakyIndex {
        fn store(
            &self,
            key: &MemoryKey,
            content: &str,
            metadata: &JsonValue,
        ) -> Result<(), IndexError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                return Err(IndexError::Unavailable("injected timeout".to_string()));
            }
            self.inner.store(key, content, metadata)
        }

        fn delete(&self, key: &MemoryKey) -> Result<(), IndexError> {
            self.inner.delete(key)
        }
    }

    fn draft() -> MemoryDraft {
        MemoryDraft::new(ProjectId::new(), SourceId::new(), "the artifact body")
    }

    #[test]
    fn write_lands_in_both_stores() {
        let relational = InMemoryRelationalStore::arc();
        let index = InMemoryIndexStore::arc();
        let writer = DualStoreWriter::new(Arc::clone(&relational), Arc::clone(&index));

        let record = writer.write(draft(), 1).unwrap();

        assert!(relational.get(&record.key).unwrap().is_some());
        let entry = index.get(&record.key).unwrap();
        assert_eq!(entry.content, "the artifact body");
    }

    #[test]
    fn index_failure_rolls_back_relational() {
        let relational = InMemoryRelationalStore::arc();
        let index = Arc::new(FlakyIndex::failing(1));
        let writer = DualStoreWriter::new(Arc::clone(&relational), Arc::clone(&index));

        let err = writer.write(draft(), 1).unwrap_err();
        assert!(matches!(err, WriteError::Consistency { .. }));
        assert!(err.is_retryable());
        assert_eq!(relational.count().unwrap(), 0);
    }

    #[test]
    fn retry_after_index_failure_commits_exactly_one_row() {
        let relational = InMemoryRelationalStore::arc();
        let index = Arc::new(FlakyIndex::failing(1));
        let writer = DualStoreWriter::new(Arc::clone(&relational), Arc::clone(&index));

        assert!(writer.write(draft(), 1).is_err());
        let record = writer.write(draft(), 1).unwrap();

        assert_eq!(relational.count().unwrap(), 1);
        assert!(relational.get(&record.key).unwrap().is_some());
        assert_eq!(index.inner.len(), 1);
    }

    #[test]
    fn exhausted_attempts_leave_zero_rows() {
        let relational = InMemoryRelationalStore::arc();
        let index = Arc::new(FlakyIndex::failing(u32::MAX));
        let writer = DualStoreWriter::new(Arc::clone(&relational), Arc::clone(&index));

        for _ in 0..3 {
            assert!(writer.write(draft(), 1).is_err());
        }
        assert_eq!(relational.count().unwrap(), 0);
        assert_eq!(index.inner.len(), 0);
    }

    #[test]
    fn delete_removes_both_sides() {
        let relational = InMemoryRelationalStore::arc();
        let index = InMemoryIndexStore::arc();
        let writer = DualStoreWriter::new(Arc::clone(&relational), Arc::clone(&index));

        let record = writer.write(draft(), 1).unwrap();
        assert!(writer.delete(&record.key).unwrap());

        assert!(relational.get(&record.key).unwrap().is_none());
        assert!(index.get(&record.key).is_none());
    }

    #[test]
    fn delete_of_missing_key_is_false() {
        let writer = DualStoreWriter::new(InMemoryRelationalStore::arc(), InMemoryIndexStore::arc());
        assert!(!writer.delete(&MemoryKey::new()).unwrap());
    }

    /// Index delete failure after a committed relational delete is tolerated.
    #[test]
    fn index_delete_failure_is_nonfatal() {
        struct DeleteFails(InMemoryIndexStore);
        impl IndexStore for DeleteFails {
            fn store(&self, key: &MemoryKey, content: &str, metadata: &JsonValue) -> Result<(), IndexError> {
                self.0.store(key, content, metadata)
            }
            fn delete(&self, _key: &MemoryKey) -> Result<(), IndexError> {
                Err(IndexError::Unavailable("injected".to_string()))
            }
        }

        let relational = InMemoryRelationalStore::arc();
        let index = Arc::new(DeleteFails(InMemoryIndexStore::new()));
        let writer = DualStoreWriter::new(Arc::clone(&relational), Arc::clone(&index));

        let record = writer.write(draft(), 1).unwrap();
        assert!(writer.delete(&record.key).unwrap());

        // Relational row is gone; the index entry is an accepted orphan.
        assert!(relational.get(&record.key).unwrap().is_none());
        assert!(index.0.get(&record.key).is_some());
    }
}
