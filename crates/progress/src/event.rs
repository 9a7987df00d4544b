//! Progress event schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use scribe_core::{JobId, ProjectId};

/// An update as published by a worker, before the bus stamps a sequence
/// number on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub project_id: ProjectId,
    /// Stage name at this boundary ("extract", "persist", ...).
    pub stage: String,
    /// Percent complete in [0, 100].
    pub percent: u8,
    /// Incremental state patch (shallow JSON object merge semantics).
    pub patch: JsonValue,
}

impl ProgressUpdate {
    pub fn new(
        job_id: JobId,
        project_id: ProjectId,
        stage: impl Into<String>,
        percent: u8,
        patch: JsonValue,
    ) -> Self {
        Self {
            job_id,
            project_id,
            stage: stage.into(),
            percent,
            patch,
        }
    }
}

/// A sequenced progress event.
///
/// Sequence numbers for a given job start at 1, increase strictly by 1, and
/// are never reused. Re-delivery is possible across reconnects; consumers
/// dedup by `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub seq: u64,
    pub stage: String,
    pub percent: u8,
    pub patch: JsonValue,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub(crate) fn from_update(update: ProgressUpdate, seq: u64) -> Self {
        Self {
            job_id: update.job_id,
            project_id: update.project_id,
            seq,
            stage: update.stage,
            percent: update.percent,
            patch: update.patch,
            at: Utc::now(),
        }
    }
}

/// Full accumulated state of a job's progress stream.
///
/// Delivered instead of incremental patches when a subscriber's cursor
/// precedes the retained window. `seq` is the sequence number of the last
/// event folded into `state`; live delivery continues from `seq + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub seq: u64,
    pub stage: String,
    pub percent: u8,
    /// All patches folded together (shallow object merge, later wins).
    pub state: JsonValue,
}

/// Fold `patch` into `state` with shallow object-merge semantics: object
/// keys overwrite, a non-object patch replaces the state wholesale.
pub(crate) fn merge_patch(state: &mut JsonValue, patch: &JsonValue) {
    match (state.as_object_mut(), patch.as_object()) {
        (Some(state_map), Some(patch_map)) => {
            for (k, v) in patch_map {
                state_map.insert(k.clone(), v.clone());
            }
        }
        _ => {
            if !patch.is_null() {
                *state = patch.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_keys_shallowly() {
        let mut state = json!({"a": 1, "b": {"x": 1}});
        merge_patch(&mut state, &json!({"b": {"y": 2}, "c": 3}));
        assert_eq!(state, json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }

    #[test]
    fn null_patch_is_a_noop() {
        let mut state = json!({"a": 1});
        merge_patch(&mut state, &JsonValue::Null);
        assert_eq!(state, json!({"a": 1}));
    }

    #[test]
    fn event_serializes_with_seq() {
        let update = ProgressUpdate::new(JobId::new(), ProjectId::new(), "extract", 25, json!({}));
        let event = ProgressEvent::from_update(update, 1);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["seq"], 1);
        assert_eq!(value["stage"], "extract");
    }
}
