//! Repository Module
//!
//! PostgreSQL implementations of the runner's storage traits.
//! Each submodule handles database operations for a specific domain entity.

pub mod lock;
pub mod record;
pub mod result;
pub mod schedule;

pub use lock::PgSingletonLock;

use drover_runner::StoreError;
use sqlx::PgPool;

/// Job records, results and schedules on one connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    tracing::error!("Database error: {:?}", err);
    StoreError::backend(err)
}

/// Column values that no longer parse are a backend fault
fn parse_column<T>(value: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Backend(format!("corrupt column value '{}': {}", value, e)))
}
