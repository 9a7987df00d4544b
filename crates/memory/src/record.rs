//! Memory record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use scribe_core::{ProjectId, SourceId};

/// Relational identity of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryRecordId(pub Uuid);

impl MemoryRecordId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MemoryRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryRecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque key shared between the relational row and the index entry.
///
/// This is the only link between the two stores; neither store knows the
/// other's native identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryKey(pub Uuid);

impl MemoryKey {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MemoryKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The content of a memory before it has an identity in either store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDraft {
    pub project_id: ProjectId,
    pub source_id: SourceId,
    pub content: String,
    pub attributes: JsonValue,
}

impl MemoryDraft {
    pub fn new(project_id: ProjectId, source_id: SourceId, content: impl Into<String>) -> Self {
        Self {
            project_id,
            source_id,
            content: content.into(),
            attributes: JsonValue::Null,
        }
    }

    pub fn with_attributes(mut self, attributes: JsonValue) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A committed memory artifact.
///
/// Records are **immutable after commit**: a later revision of the same
/// source produces a new record with a new key and a bumped `version`,
/// never an in-place edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryRecordId,
    pub project_id: ProjectId,
    pub source_id: SourceId,
    /// Shared key linking this row to its index entry.
    pub key: MemoryKey,
    pub content: String,
    pub attributes: JsonValue,
    /// Revision counter across records for the same source.
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Materialize a draft into a record with fresh identities.
    pub fn from_draft(draft: MemoryDraft, version: u32) -> Self {
        Self {
            id: MemoryRecordId::new(),
            project_id: draft.project_id,
            source_id: draft.source_id,
            key: MemoryKey::new(),
            content: draft.content,
            attributes: draft.attributes,
            version,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_materializes_with_distinct_identities() {
        let draft = MemoryDraft::new(ProjectId::new(), SourceId::new(), "content");
        let a = MemoryRecord::from_draft(draft.clone(), 1);
        let b = MemoryRecord::from_draft(draft, 2);

        assert_ne!(a.id, b.id);
        assert_ne!(a.key, b.key);
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
    }
}
