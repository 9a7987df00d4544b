//! Store seams and in-memory implementations.
//!
//! The relational seam exposes explicit transaction primitives
//! (`begin → insert → flush → commit/rollback`) because the dual-store
//! protocol needs to hold a prepared-but-uncommitted row open while the
//! index write is in flight. The index seam is a plain store/delete API:
//! the external index has no transactions to offer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use scribe_core::ProjectId;

use crate::record::{MemoryKey, MemoryRecord};

/// Relational store error.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("record already exists for key {0}")]
    DuplicateKey(MemoryKey),
    #[error("transaction already finished")]
    TransactionClosed,
    #[error("storage error: {0}")]
    Storage(String),
}

/// Index store error.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// Network failure, timeout, or temporary unavailability. Retryable.
    #[error("index store unavailable: {0}")]
    Unavailable(String),
    /// The index rejected the entry outright. Not retryable.
    #[error("index store rejected entry: {0}")]
    Rejected(String),
}

/// An open relational transaction.
///
/// Rows inserted and flushed are visible only inside this transaction until
/// `commit`. Dropping the transaction without committing rolls it back.
pub trait RelationalTransaction: Send {
    /// Stage a record inside the transaction.
    fn insert(&mut self, record: MemoryRecord) -> Result<(), StoreError>;

    /// Flush staged rows so their identities are assigned/visible to this
    /// transaction, without committing.
    fn flush(&mut self) -> Result<(), StoreError>;

    /// Stage a delete by key. Returns whether a row existed.
    fn delete(&mut self, key: &MemoryKey) -> Result<bool, StoreError>;

    /// Commit the transaction, making all staged changes durable.
    fn commit(self) -> Result<(), StoreError>;

    /// Roll the transaction back, discarding all staged changes.
    fn rollback(self) -> Result<(), StoreError>;
}

/// Transactional relational store seam.
pub trait RelationalStore: Send + Sync + 'static {
    type Tx: RelationalTransaction + 'static;

    fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Look up a committed record by its shared key.
    fn get(&self, key: &MemoryKey) -> Result<Option<MemoryRecord>, StoreError>;

    /// All committed records for a project, oldest first.
    fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Number of committed records (visibility for tests and stats).
    fn count(&self) -> Result<usize, StoreError>;
}

/// Entry held by the index store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub content: String,
    pub metadata: JsonValue,
}

/// External index store seam (embedding/vector index).
///
/// No transactions: a call either lands or it does not, and the caller owns
/// the consistency protocol around it.
pub trait IndexStore: Send + Sync + 'static {
    fn store(&self, key: &MemoryKey, content: &str, metadata: &JsonValue) -> Result<(), IndexError>;

    fn delete(&self, key: &MemoryKey) -> Result<(), IndexError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory implementations (tests/dev)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RelationalState {
    rows: HashMap<MemoryKey, MemoryRecord>,
}

/// In-memory relational store with real staged/flushed/committed semantics.
#[derive(Debug, Default)]
pub struct InMemoryRelationalStore {
    state: Arc<RwLock<RelationalState>>,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

/// Transaction over the in-memory store.
///
/// Staged changes live in the transaction until commit; flush only marks
/// them identity-visible, matching the durable implementation's shape.
#[derive(Debug)]
pub struct InMemoryTransaction {
    state: Arc<RwLock<RelationalState>>,
    staged_inserts: Vec<MemoryRecord>,
    staged_deletes: Vec<MemoryKey>,
    flushed: bool,
    finished: bool,
}

impl InMemoryTransaction {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }
}

impl RelationalTransaction for InMemoryTransaction {
    fn insert(&mut self, record: MemoryRecord) -> Result<(), StoreError> {
        self.check_open()?;

        let state = self.state.read().map_err(|_| poisoned())?;
        if state.rows.contains_key(&record.key)
            || self.staged_inserts.iter().any(|r| r.key == record.key)
        {
            return Err(StoreError::DuplicateKey(record.key));
        }
        drop(state);

        self.staged_inserts.push(record);
        self.flushed = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        self.flushed = true;
        Ok(())
    }

    fn delete(&mut self, key: &MemoryKey) -> Result<bool, StoreError> {
        self.check_open()?;

        let existed = {
            let state = self.state.read().map_err(|_| poisoned())?;
            state.rows.contains_key(key)
        } || self.staged_inserts.iter().any(|r| r.key == *key);

        self.staged_inserts.retain(|r| r.key != *key);
        if existed {
            self.staged_deletes.push(*key);
        }
        Ok(existed)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.check_open()?;
        self.finished = true;

        let mut state = self.state.write().map_err(|_| poisoned())?;
        for key in self.staged_deletes.drain(..) {
            state.rows.remove(&key);
        }
        for record in self.staged_inserts.drain(..) {
            state.rows.insert(record.key, record);
        }
        Ok(())
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        self.check_open()?;
        self.finished = true;
        self.staged_inserts.clear();
        self.staged_deletes.clear();
        Ok(())
    }
}

impl RelationalStore for InMemoryRelationalStore {
    type Tx = InMemoryTransaction;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTransaction {
            state: Arc::clone(&self.state),
            staged_inserts: Vec::new(),
            staged_deletes: Vec::new(),
            flushed: false,
            finished: false,
        })
    }

    fn get(&self, key: &MemoryKey) -> Result<Option<MemoryRecord>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.rows.get(key).cloned())
    }

    fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<MemoryRecord>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut rows: Vec<_> = state
            .rows
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.rows.len())
    }
}

impl RelationalStore for Arc<InMemoryRelationalStore> {
    type Tx = InMemoryTransaction;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin()
    }

    fn get(&self, key: &MemoryKey) -> Result<Option<MemoryRecord>, StoreError> {
        (**self).get(key)
    }

    fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<MemoryRecord>, StoreError> {
        (**self).list_by_project(project_id)
    }

    fn count(&self) -> Result<usize, StoreError> {
        (**self).count()
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

/// In-memory index store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryIndexStore {
    entries: RwLock<HashMap<MemoryKey, IndexEntry>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn get(&self, key: &MemoryKey) -> Option<IndexEntry> {
        self.entries.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexStore for InMemoryIndexStore {
    fn store(&self, key: &MemoryKey, content: &str, metadata: &JsonValue) -> Result<(), IndexError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| IndexError::Unavailable("lock poisoned".to_string()))?;
        entries.insert(
            *key,
            IndexEntry {
                content: content.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &MemoryKey) -> Result<(), IndexError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| IndexError::Unavailable("lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

impl<I> IndexStore for Arc<I>
where
    I: IndexStore + ?Sized,
{
    fn store(&self, key: &MemoryKey, content: &str, metadata: &JsonValue) -> Result<(), IndexError> {
        (**self).store(key, content, metadata)
    }

    fn delete(&self, key: &MemoryKey) -> Result<(), IndexError> {
        (**self).delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryDraft;
    use scribe_core::SourceId;

    fn record(project: ProjectId) -> MemoryRecord {
        MemoryRecord::from_draft(
            MemoryDraft::new(project, SourceId::new(), "requirement text"),
            1,
        )
    }

    #[test]
    fn committed_rows_are_visible() {
        let store = InMemoryRelationalStore::new();
        let rec = record(ProjectId::new());
        let key = rec.key;

        let mut tx = store.begin().unwrap();
        tx.insert(rec).unwrap();
        tx.flush().unwrap();
        assert!(store.get(&key).unwrap().is_none(), "flushed but not committed");

        tx.commit().unwrap();
        assert!(store.get(&key).unwrap().is_some());
    }

    #[test]
    fn rollback_discards_staged_rows() {
        let store = InMemoryRelationalStore::new();
        let rec = record(ProjectId::new());
        let key = rec.key;

        let mut tx = store.begin().unwrap();
        tx.insert(rec).unwrap();
        tx.flush().unwrap();
        tx.rollback().unwrap();

        assert!(store.get(&key).unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn duplicate_key_rejected() {
        let store = InMemoryRelationalStore::new();
        let rec = record(ProjectId::new());

        let mut tx = store.begin().unwrap();
        tx.insert(rec.clone()).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert!(matches!(
            tx.insert(rec),
            Err(StoreError::DuplicateKey(_))
        ));
    }

    #[test]
    fn delete_inside_transaction() {
        let store = InMemoryRelationalStore::new();
        let rec = record(ProjectId::new());
        let key = rec.key;

        let mut tx = store.begin().unwrap();
        tx.insert(rec).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert!(tx.delete(&key).unwrap());
        // Still visible outside until commit.
        assert!(store.get(&key).unwrap().is_some());
        tx.commit().unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn list_by_project_is_scoped_and_ordered() {
        let store = InMemoryRelationalStore::new();
        let project = ProjectId::new();

        for _ in 0..3 {
            let mut tx = store.begin().unwrap();
            tx.insert(record(project)).unwrap();
            tx.commit().unwrap();
        }
        let mut tx = store.begin().unwrap();
        tx.insert(record(ProjectId::new())).unwrap();
        tx.commit().unwrap();

        let rows = store.list_by_project(project).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }
}
