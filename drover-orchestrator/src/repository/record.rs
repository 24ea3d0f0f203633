//! Job Record Repository
//!
//! Handles all database operations related to job records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::job::{JobIdentity, JobRecord};
use drover_runner::{RecordRepository, StoreError};

use super::{PgStore, db_error, parse_column};

#[async_trait]
impl RecordRepository for PgStore {
    async fn list_records(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT identity, source, name, grouping, description, enabled, installed,
                   name_override, grouping_override, description_override, queue,
                   created_at, updated_at
            FROM job_records
            ORDER BY identity ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn get_record(&self, identity: &JobIdentity) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT identity, source, name, grouping, description, enabled, installed,
                   name_override, grouping_override, description_override, queue,
                   created_at, updated_at
            FROM job_records
            WHERE identity = $1
            "#,
        )
        .bind(identity.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn save_record(&self, record: &JobRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_records (identity, source, name, grouping, description, enabled,
                                     installed, name_override, grouping_override,
                                     description_override, queue, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (identity) DO UPDATE SET
                source = EXCLUDED.source,
                name = EXCLUDED.name,
                grouping = EXCLUDED.grouping,
                description = EXCLUDED.description,
                enabled = EXCLUDED.enabled,
                installed = EXCLUDED.installed,
                name_override = EXCLUDED.name_override,
                grouping_override = EXCLUDED.grouping_override,
                description_override = EXCLUDED.description_override,
                queue = EXCLUDED.queue,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.identity.to_string())
        .bind(record.source.as_str())
        .bind(&record.name)
        .bind(&record.grouping)
        .bind(&record.description)
        .bind(record.enabled)
        .bind(record.installed)
        .bind(&record.name_override)
        .bind(&record.grouping_override)
        .bind(&record.description_override)
        .bind(&record.queue)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn delete_record(&self, identity: &JobIdentity) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM job_records WHERE identity = $1")
            .bind(identity.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RecordRow {
    identity: String,
    source: String,
    name: String,
    grouping: String,
    description: Option<String>,
    enabled: bool,
    installed: bool,
    name_override: Option<String>,
    grouping_override: Option<String>,
    description_override: Option<String>,
    queue: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            identity: parse_column(&row.identity)?,
            source: parse_column(&row.source)?,
            name: row.name,
            grouping: row.grouping,
            description: row.description,
            enabled: row.enabled,
            installed: row.installed,
            name_override: row.name_override,
            grouping_override: row.grouping_override,
            description_override: row.description_override,
            queue: row.queue,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
