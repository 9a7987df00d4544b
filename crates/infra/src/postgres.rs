//! Postgres-backed relational memory store.
//!
//! Implements the synchronous `RelationalStore` seam over sqlx. The worker
//! pool runs on plain threads, so the store owns a small tokio runtime and
//! drives each query to completion with `block_on`; an open transaction
//! pins its pooled connection until commit or rollback.
//!
//! ## Error mapping
//!
//! | sqlx error | Postgres code | `StoreError` |
//! |------------|---------------|--------------|
//! | Database (unique violation on `memory_key`) | `23505` | `DuplicateKey` |
//! | Database (other) | any | `Storage` |
//! | Pool/network/timeout | n/a | `Storage` |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Postgres, Row, Transaction};
use tokio::runtime::Runtime;
use tracing::debug;
use uuid::Uuid;

use scribe_core::{ProjectId, SourceId};
use scribe_memory::{
    MemoryKey, MemoryRecord, MemoryRecordId, RelationalStore, RelationalTransaction, StoreError,
};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    source_id UUID NOT NULL,
    memory_key UUID NOT NULL UNIQUE,
    content TEXT NOT NULL,
    attributes JSONB NOT NULL DEFAULT 'null'::jsonb,
    version INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS memories_project_idx ON memories (project_id, created_at)";

/// Relational store over a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PostgresMemoryStore {
    pool: PgPool,
    rt: Arc<Runtime>,
}

impl PostgresMemoryStore {
    /// Connect and make sure the schema exists.
    pub fn connect(database_url: &str) -> Result<Self, StoreError> {
        let rt = Runtime::new()
            .map_err(|e| StoreError::Storage(format!("tokio runtime: {e}")))?;

        let pool = rt
            .block_on(
                PgPoolOptions::new()
                    .max_connections(8)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self {
            pool,
            rt: Arc::new(rt),
        };
        store.ensure_schema()?;
        debug!("postgres memory store connected");
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.rt.block_on(async {
            sqlx::query(CREATE_TABLE)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_table", e))?;
            sqlx::query(CREATE_INDEX)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("create_index", e))?;
            Ok(())
        })
    }
}

/// One open Postgres transaction.
///
/// Dropping it without committing rolls it back when the connection returns
/// to the pool.
pub struct PostgresMemoryTransaction {
    rt: Arc<Runtime>,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresMemoryTransaction {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, StoreError> {
        self.tx.as_mut().ok_or(StoreError::TransactionClosed)
    }
}

impl RelationalTransaction for PostgresMemoryTransaction {
    fn insert(&mut self, record: MemoryRecord) -> Result<(), StoreError> {
        let key = record.key;
        let rt = Arc::clone(&self.rt);
        let tx = self.tx()?;

        rt.block_on(
            sqlx::query(
                r#"
                INSERT INTO memories (
                    id, project_id, source_id, memory_key,
                    content, attributes, version, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.id.0)
            .bind(Uuid::from(record.project_id))
            .bind(Uuid::from(record.source_id))
            .bind(record.key.0)
            .bind(&record.content)
            .bind(&record.attributes)
            .bind(record.version as i32)
            .bind(record.created_at)
            .execute(&mut **tx),
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateKey(key)
            } else {
                map_sqlx_error("insert", e)
            }
        })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        // Statements are executed eagerly; flushing only asserts the
        // transaction is still open.
        self.tx().map(|_| ())
    }

    fn delete(&mut self, key: &MemoryKey) -> Result<bool, StoreError> {
        let rt = Arc::clone(&self.rt);
        let tx = self.tx()?;

        let result = rt
            .block_on(
                sqlx::query("DELETE FROM memories WHERE memory_key = $1")
                    .bind(key.0)
                    .execute(&mut **tx),
            )
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        self.rt
            .block_on(tx.commit())
            .map_err(|e| map_sqlx_error("commit", e))
    }

    fn rollback(mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        self.rt
            .block_on(tx.rollback())
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

impl RelationalStore for PostgresMemoryStore {
    type Tx = PostgresMemoryTransaction;

    fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .rt
            .block_on(self.pool.begin())
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PostgresMemoryTransaction {
            rt: Arc::clone(&self.rt),
            tx: Some(tx),
        })
    }

    fn get(&self, key: &MemoryKey) -> Result<Option<MemoryRecord>, StoreError> {
        let row = self
            .rt
            .block_on(
                sqlx::query(
                    r#"
                    SELECT id, project_id, source_id, memory_key,
                           content, attributes, version, created_at
                    FROM memories
                    WHERE memory_key = $1
                    "#,
                )
                .bind(key.0)
                .fetch_optional(&self.pool),
            )
            .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| {
            MemoryRow::from_row(&r)
                .map(MemoryRecord::from)
                .map_err(|e| StoreError::Storage(format!("decode memory row: {e}")))
        })
        .transpose()
    }

    fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = self
            .rt
            .block_on(
                sqlx::query(
                    r#"
                    SELECT id, project_id, source_id, memory_key,
                           content, attributes, version, created_at
                    FROM memories
                    WHERE project_id = $1
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(Uuid::from(project_id))
                .fetch_all(&self.pool),
            )
            .map_err(|e| map_sqlx_error("list_by_project", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let decoded = MemoryRow::from_row(&row)
                .map_err(|e| StoreError::Storage(format!("decode memory row: {e}")))?;
            records.push(decoded.into());
        }
        Ok(records)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let row = self
            .rt
            .block_on(sqlx::query("SELECT COUNT(*) AS total FROM memories").fetch_one(&self.pool))
            .map_err(|e| map_sqlx_error("count", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Storage(format!("decode count: {e}")))?;
        Ok(total as usize)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("{operation}: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

#[derive(Debug)]
struct MemoryRow {
    id: Uuid,
    project_id: Uuid,
    source_id: Uuid,
    memory_key: Uuid,
    content: String,
    attributes: serde_json::Value,
    version: i32,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MemoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MemoryRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            source_id: row.try_get("source_id")?,
            memory_key: row.try_get("memory_key")?,
            content: row.try_get("content")?,
            attributes: row.try_get("attributes")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<MemoryRow> for MemoryRecord {
    fn from(row: MemoryRow) -> Self {
        MemoryRecord {
            id: MemoryRecordId(row.id),
            project_id: ProjectId::from_uuid(row.project_id),
            source_id: SourceId::from_uuid(row.source_id),
            key: MemoryKey(row.memory_key),
            content: row.content,
            attributes: row.attributes,
            version: row.version as u32,
            created_at: row.created_at,
        }
    }
}
