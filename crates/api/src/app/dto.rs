//! Request/response DTOs.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use scribe_core::{JobId, ProjectId, SourceId};
use scribe_extraction::ConversationInput;
use scribe_memory::MemoryKey;
use scribe_pipeline::{JobPayload, PoolStats, Priority, QueueStats};

/// Body of `POST /jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(flatten)]
    pub job: SubmitJobKind,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitJobKind {
    GenerateMemory {
        project_id: Uuid,
        source_id: Uuid,
        text: String,
        #[serde(default)]
        metadata: JsonValue,
    },
    DeleteMemory {
        project_id: Uuid,
        key: Uuid,
    },
}

impl SubmitJobRequest {
    pub fn into_payload(self) -> JobPayload {
        match self.job {
            SubmitJobKind::GenerateMemory {
                project_id,
                source_id,
                text,
                metadata,
            } => JobPayload::GenerateMemory {
                input: ConversationInput::new(
                    ProjectId::from_uuid(project_id),
                    SourceId::from_uuid(source_id),
                    text,
                )
                .with_metadata(metadata),
            },
            SubmitJobKind::DeleteMemory { project_id, key } => JobPayload::DeleteMemory {
                project_id: ProjectId::from_uuid(project_id),
                key: MemoryKey(key),
            },
        }
    }
}

/// `202 Accepted` body for a submitted job.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
}

/// Body of `POST /jobs/{id}/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Body of `GET /stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub queue: QueueStats,
    pub pool: PoolStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_request_parses_with_default_priority() {
        let body = json!({
            "kind": "generate_memory",
            "project_id": Uuid::now_v7(),
            "source_id": Uuid::now_v7(),
            "text": "the requirement",
        });
        let req: SubmitJobRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.priority, Priority::Normal);
        assert!(matches!(req.job, SubmitJobKind::GenerateMemory { .. }));
    }

    #[test]
    fn submit_request_parses_delete_with_priority() {
        let body = json!({
            "kind": "delete_memory",
            "project_id": Uuid::now_v7(),
            "key": Uuid::now_v7(),
            "priority": "high",
        });
        let req: SubmitJobRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.priority, Priority::High);
        assert!(matches!(req.into_payload(), JobPayload::DeleteMemory { .. }));
    }
}
