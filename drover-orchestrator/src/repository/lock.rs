//! Singleton leases in the `job_locks` table

use async_trait::async_trait;
use chrono::Utc;
use drover_runner::{SingletonLock, StoreError};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::db_error;

pub struct PgSingletonLock {
    pool: PgPool,
}

impl PgSingletonLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SingletonLock for PgSingletonLock {
    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        force: bool,
    ) -> Result<Option<String>, StoreError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(StoreError::backend)?;
        let token = Uuid::new_v4().to_string();

        // Takes a free key, an expired lease, or any lease when forced
        let acquired: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO job_locks (key, token, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
                SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
                WHERE job_locks.expires_at <= $4 OR $5
            RETURNING token
            "#,
        )
        .bind(key)
        .bind(&token)
        .bind(now + ttl)
        .bind(now)
        .bind(force)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(acquired.map(|(token,)| token))
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM job_locks WHERE key = $1 AND token = $2")
            .bind(key)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }
}
