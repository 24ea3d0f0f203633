//! Scheduled Job Repository
//!
//! Handles all database operations related to held and recurring runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::schedule::{ScheduleInterval, ScheduledJob};
use drover_runner::{ScheduleRepository, StoreError};
use uuid::Uuid;

use super::{PgStore, db_error, parse_column};

const SCHEDULE_COLUMNS: &str = "id, name, job_identity, username, kwargs, schedule_interval, \
    start_time, last_run_at, total_run_count, approval_required, approved_by, approved_at, \
    enabled, created_at";

#[async_trait]
impl ScheduleRepository for PgStore {
    async fn insert_scheduled(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (id, name, job_identity, username, kwargs,
                                        schedule_interval, start_time, last_run_at,
                                        total_run_count, approval_required, approved_by,
                                        approved_at, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(job.job_identity.to_string())
        .bind(&job.user)
        .bind(&job.kwargs)
        .bind(job.interval.as_str())
        .bind(job.start_time)
        .bind(job.last_run_at)
        .bind(job.total_run_count)
        .bind(job.approval_required)
        .bind(&job.approved_by)
        .bind(job.approved_at)
        .bind(job.enabled)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_scheduled(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM scheduled_jobs WHERE id = $1",
            SCHEDULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(ScheduledJob::try_from).transpose()
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM scheduled_jobs ORDER BY created_at ASC",
            SCHEDULE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(ScheduledJob::try_from).collect()
    }

    async fn update_scheduled(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET name = $2, kwargs = $3, schedule_interval = $4, start_time = $5,
                last_run_at = $6, total_run_count = $7, approval_required = $8,
                approved_by = $9, approved_at = $10, enabled = $11
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.kwargs)
        .bind(job.interval.as_str())
        .bind(job.start_time)
        .bind(job.last_run_at)
        .bind(job.total_run_count)
        .bind(job.approval_required)
        .bind(&job.approved_by)
        .bind(job.approved_at)
        .bind(job.enabled)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn claim_approval(
        &self,
        id: Uuid,
        approver: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>, StoreError> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            r#"
            UPDATE scheduled_jobs
            SET approved_by = $2, approved_at = $3,
                enabled = enabled AND schedule_interval <> $4
            WHERE id = $1 AND approval_required AND approved_at IS NULL
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(id)
        .bind(approver)
        .bind(approved_at)
        .bind(ScheduleInterval::Immediately.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(ScheduledJob::try_from).transpose()
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, StoreError> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            r#"
            SELECT {}
            FROM scheduled_jobs
            WHERE enabled
              AND start_time <= $1
              AND (NOT approval_required OR approved_at IS NOT NULL)
            ORDER BY start_time ASC
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(ScheduledJob::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    name: String,
    job_identity: String,
    username: String,
    kwargs: serde_json::Value,
    schedule_interval: String,
    start_time: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    total_run_count: i64,
    approval_required: bool,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for ScheduledJob {
    type Error = StoreError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        Ok(ScheduledJob {
            id: row.id,
            name: row.name,
            job_identity: parse_column(&row.job_identity)?,
            user: row.username,
            kwargs: row.kwargs,
            interval: parse_column(&row.schedule_interval)?,
            start_time: row.start_time,
            last_run_at: row.last_run_at,
            total_run_count: row.total_run_count,
            approval_required: row.approval_required,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            enabled: row.enabled,
            created_at: row.created_at,
        })
    }
}
