use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Job records, one per discoverable job
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_records (
            identity VARCHAR(255) PRIMARY KEY,
            source VARCHAR(20) NOT NULL,
            name VARCHAR(255) NOT NULL,
            grouping VARCHAR(255) NOT NULL,
            description TEXT,
            enabled BOOLEAN NOT NULL DEFAULT FALSE,
            installed BOOLEAN NOT NULL DEFAULT TRUE,
            name_override VARCHAR(255),
            grouping_override VARCHAR(255),
            description_override TEXT,
            queue VARCHAR(100) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            job_identity VARCHAR(255) NOT NULL,
            username VARCHAR(255) NOT NULL,
            kwargs JSONB NOT NULL DEFAULT '{}',
            schedule_interval VARCHAR(20) NOT NULL,
            start_time TIMESTAMPTZ NOT NULL,
            last_run_at TIMESTAMPTZ,
            total_run_count BIGINT NOT NULL DEFAULT 0,
            approval_required BOOLEAN NOT NULL DEFAULT FALSE,
            approved_by VARCHAR(255),
            approved_at TIMESTAMPTZ,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Results outlive their job record and schedule
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_results (
            id UUID PRIMARY KEY,
            job_identity VARCHAR(255) NOT NULL,
            job_name VARCHAR(255) NOT NULL,
            username VARCHAR(255) NOT NULL,
            status VARCHAR(20) NOT NULL,
            task_queue VARCHAR(100) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            result JSONB,
            traceback TEXT,
            error_kind VARCHAR(50),
            task_kwargs JSONB,
            scheduled_job_id UUID
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_log_entries (
            id UUID PRIMARY KEY,
            result_id UUID NOT NULL REFERENCES job_results(id) ON DELETE CASCADE,
            sequence BIGINT NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL,
            level VARCHAR(20) NOT NULL,
            message TEXT NOT NULL,
            grouping VARCHAR(255),
            object JSONB,
            UNIQUE (result_id, sequence)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_files (
            id UUID PRIMARY KEY,
            result_id UUID NOT NULL REFERENCES job_results(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            size BIGINT NOT NULL,
            content BYTEA NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Singleton leases
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_locks (
            key VARCHAR(512) PRIMARY KEY,
            token VARCHAR(64) NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_results_created_at ON job_results(created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_results_identity ON job_results(job_identity, created_at DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_results_status ON job_results(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_files_result_id ON job_files(result_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due ON scheduled_jobs(enabled, start_time)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
