//! Job Result Repository
//!
//! Results with their log entries and output files. Log sequences are
//! assigned under a row lock on the owning result so concurrent flushes
//! cannot interleave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::file::JobFile;
use drover_core::domain::log::{JobLogEntry, ObjectRef};
use drover_core::domain::result::{JobResult, JobStatus};
use drover_core::dto::result::ResultQuery;
use drover_jobs::LogRecord;
use drover_runner::{Outcome, ResultRepository, StoreError};
use sqlx::types::Json;
use uuid::Uuid;

use super::{PgStore, db_error, parse_column};

const RESULT_COLUMNS: &str = "id, job_identity, job_name, username, status, task_queue, \
    created_at, started_at, completed_at, result, traceback, error_kind, task_kwargs, \
    scheduled_job_id";

#[async_trait]
impl ResultRepository for PgStore {
    async fn insert_result(&self, result: &JobResult) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_results (id, job_identity, job_name, username, status, task_queue,
                                     created_at, started_at, completed_at, result, traceback,
                                     error_kind, task_kwargs, scheduled_job_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(result.id)
        .bind(result.job_identity.to_string())
        .bind(&result.job_name)
        .bind(&result.user)
        .bind(result.status.as_str())
        .bind(&result.task_queue)
        .bind(result.created_at)
        .bind(result.started_at)
        .bind(result.completed_at)
        .bind(&result.result)
        .bind(&result.traceback)
        .bind(result.error_kind.map(|k| k.as_str()))
        .bind(&result.task_kwargs)
        .bind(result.scheduled_job_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError> {
        let row = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {} FROM job_results WHERE id = $1",
            RESULT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(JobResult::try_from).transpose()
    }

    async fn list_results(&self, query: &ResultQuery) -> Result<Vec<JobResult>, StoreError> {
        let rows = sqlx::query_as::<_, ResultRow>(&format!(
            r#"
            SELECT {}
            FROM job_results
            WHERE ($1::VARCHAR IS NULL OR job_identity = $1)
              AND ($2::VARCHAR IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
            RESULT_COLUMNS
        ))
        .bind(query.job.as_ref().map(|job| job.to_string()))
        .bind(query.status.map(|status| status.as_str()))
        .bind(query.limit.map(|limit| limit as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(JobResult::try_from).collect()
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE job_results
            SET status = $2, started_at = $3
            WHERE id = $1 AND status = $4
            "#,
        )
        .bind(id)
        .bind(JobStatus::Running.as_str())
        .bind(started_at)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if updated.rows_affected() == 0 && self.get_result(id).await?.is_none() {
            return Err(StoreError::ResultNotFound(id));
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        outcome: &Outcome,
        completed_at: DateTime<Utc>,
    ) -> Result<JobResult, StoreError> {
        let row = sqlx::query_as::<_, ResultRow>(&format!(
            r#"
            UPDATE job_results
            SET status = $2, result = $3, traceback = $4, error_kind = $5, completed_at = $6
            WHERE id = $1 AND status IN ($7, $8)
            RETURNING {}
            "#,
            RESULT_COLUMNS
        ))
        .bind(id)
        .bind(outcome.status.as_str())
        .bind(&outcome.result)
        .bind(&outcome.traceback)
        .bind(outcome.error_kind.map(|k| k.as_str()))
        .bind(completed_at)
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => JobResult::try_from(row),
            None if self.get_result(id).await?.is_some() => Err(StoreError::AlreadyFinalized(id)),
            None => Err(StoreError::ResultNotFound(id)),
        }
    }

    async fn delete_result(&self, id: Uuid) -> Result<bool, StoreError> {
        // Log entries and files go with it
        let result = sqlx::query("DELETE FROM job_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_logs(&self, result_id: Uuid, records: &[LogRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM job_results WHERE id = $1 FOR UPDATE")
                .bind(result_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
        if locked.is_none() {
            return Err(StoreError::ResultNotFound(result_id));
        }

        let (mut sequence,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) FROM job_log_entries WHERE result_id = $1",
        )
        .bind(result_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        for record in records {
            sequence += 1;
            sqlx::query(
                r#"
                INSERT INTO job_log_entries (id, result_id, sequence, timestamp, level, message,
                                             grouping, object)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(result_id)
            .bind(sequence)
            .bind(record.timestamp)
            .bind(record.level.as_str())
            .bind(&record.message)
            .bind(&record.grouping)
            .bind(record.object.as_ref().map(Json))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn logs(&self, result_id: Uuid) -> Result<Vec<JobLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT id, result_id, sequence, timestamp, level, message, grouping, object
            FROM job_log_entries
            WHERE result_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(result_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(JobLogEntry::try_from).collect()
    }

    async fn insert_file(&self, file: &JobFile, content: &[u8]) -> Result<(), StoreError> {
        let exists = self.get_result(file.result_id).await?.is_some();
        if !exists {
            return Err(StoreError::ResultNotFound(file.result_id));
        }

        sqlx::query(
            r#"
            INSERT INTO job_files (id, result_id, name, size, content, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(file.id)
        .bind(file.result_id)
        .bind(&file.name)
        .bind(file.size as i64)
        .bind(content)
        .bind(file.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn files(&self, result_id: Uuid) -> Result<Vec<JobFile>, StoreError> {
        let rows = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT id, result_id, name, size, created_at
            FROM job_files
            WHERE result_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(result_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows.into_iter().map(JobFile::from).collect())
    }

    async fn file_content(
        &self,
        result_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<(JobFile, Vec<u8>)>, StoreError> {
        let row = sqlx::query_as::<_, FileContentRow>(
            r#"
            SELECT id, result_id, name, size, created_at, content
            FROM job_files
            WHERE result_id = $1 AND id = $2
            "#,
        )
        .bind(result_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(row.map(|row| {
            let content = row.content;
            let file = JobFile::from(FileRow {
                id: row.id,
                result_id: row.result_id,
                name: row.name,
                size: row.size,
                created_at: row.created_at,
            });
            (file, content)
        }))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: Uuid,
    job_identity: String,
    job_name: String,
    username: String,
    status: String,
    task_queue: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    traceback: Option<String>,
    error_kind: Option<String>,
    task_kwargs: Option<serde_json::Value>,
    scheduled_job_id: Option<Uuid>,
}

impl TryFrom<ResultRow> for JobResult {
    type Error = StoreError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(JobResult {
            id: row.id,
            job_identity: parse_column(&row.job_identity)?,
            job_name: row.job_name,
            user: row.username,
            status: parse_column(&row.status)?,
            task_queue: row.task_queue,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result: row.result,
            traceback: row.traceback,
            error_kind: row.error_kind.as_deref().map(parse_column).transpose()?,
            task_kwargs: row.task_kwargs,
            scheduled_job_id: row.scheduled_job_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    result_id: Uuid,
    sequence: i64,
    timestamp: DateTime<Utc>,
    level: String,
    message: String,
    grouping: Option<String>,
    object: Option<Json<ObjectRef>>,
}

impl TryFrom<LogRow> for JobLogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(JobLogEntry {
            id: row.id,
            result_id: row.result_id,
            sequence: row.sequence,
            timestamp: row.timestamp,
            level: parse_column(&row.level)?,
            message: row.message,
            grouping: row.grouping,
            object: row.object.map(|Json(object)| object),
        })
    }
}

#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    result_id: Uuid,
    name: String,
    size: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct FileContentRow {
    id: Uuid,
    result_id: Uuid,
    name: String,
    size: i64,
    created_at: DateTime<Utc>,
    content: Vec<u8>,
}

impl From<FileRow> for JobFile {
    fn from(row: FileRow) -> Self {
        JobFile {
            id: row.id,
            result_id: row.result_id,
            name: row.name,
            size: row.size.max(0) as u64,
            created_at: row.created_at,
        }
    }
}
