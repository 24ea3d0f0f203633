//! Repository layer
//!
//! Persistence is consumed through these traits. Implementations are plain
//! storage without business rules, except that finalization of a result is
//! a single conditional write.
//!
//! `MemoryStore` backs tests and standalone use; the service provides a
//! PostgreSQL implementation.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::file::JobFile;
use drover_core::domain::job::{JobIdentity, JobRecord};
use drover_core::domain::log::JobLogEntry;
use drover_core::domain::result::{ErrorKind, JobResult, JobStatus};
use drover_core::domain::schedule::ScheduledJob;
use drover_core::dto::result::ResultQuery;
use drover_jobs::LogRecord;
use serde_json::Value;
use uuid::Uuid;

pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job result {0} not found")]
    ResultNotFound(Uuid),

    #[error("job result {0} is already finalized")]
    AlreadyFinalized(Uuid),

    #[error("file '{name}' is {size} bytes, above the {max} byte limit")]
    FileTooLarge { name: String, size: u64, max: u64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Terminal state of an execution, written once
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: JobStatus,
    pub result: Option<Value>,
    pub traceback: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl Outcome {
    pub fn success(result: Option<Value>) -> Self {
        Self {
            status: JobStatus::Success,
            result,
            traceback: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, traceback: Option<String>) -> Self {
        Self {
            status: JobStatus::Failure,
            result: None,
            traceback,
            error_kind: Some(kind),
        }
    }
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn list_records(&self) -> Result<Vec<JobRecord>, StoreError>;

    async fn get_record(&self, identity: &JobIdentity) -> Result<Option<JobRecord>, StoreError>;

    /// Inserts or replaces the record with the same identity
    async fn save_record(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn delete_record(&self, identity: &JobIdentity) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn insert_result(&self, result: &JobResult) -> Result<(), StoreError>;

    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError>;

    /// Newest first
    async fn list_results(&self, query: &ResultQuery) -> Result<Vec<JobResult>, StoreError>;

    /// Moves a pending result to `RUNNING`; other states are left alone
    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Writes the terminal state
    ///
    /// Fails with `AlreadyFinalized` when the result is already terminal.
    async fn finalize(
        &self,
        id: Uuid,
        outcome: &Outcome,
        completed_at: DateTime<Utc>,
    ) -> Result<JobResult, StoreError>;

    /// Deletes the result with its log entries and files
    async fn delete_result(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Appends records after the result's last entry, keeping their order
    async fn append_logs(&self, result_id: Uuid, records: &[LogRecord]) -> Result<(), StoreError>;

    /// Ordered by sequence
    async fn logs(&self, result_id: Uuid) -> Result<Vec<JobLogEntry>, StoreError>;

    async fn insert_file(&self, file: &JobFile, content: &[u8]) -> Result<(), StoreError>;

    async fn files(&self, result_id: Uuid) -> Result<Vec<JobFile>, StoreError>;

    async fn file_content(
        &self,
        result_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<(JobFile, Vec<u8>)>, StoreError>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert_scheduled(&self, job: &ScheduledJob) -> Result<(), StoreError>;

    async fn get_scheduled(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError>;

    /// Oldest first
    async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>, StoreError>;

    async fn update_scheduled(&self, job: &ScheduledJob) -> Result<(), StoreError>;

    /// Records the approval of an entry still awaiting it, in one write
    ///
    /// Returns `None` when the entry is gone or no longer awaiting approval.
    /// An approved `immediately` entry is also disabled, leaving its single
    /// run to the approver rather than the scheduler.
    async fn claim_approval(
        &self,
        id: Uuid,
        approver: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>, StoreError>;

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Entries the scheduler should dispatch at `now`
    async fn due_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>, StoreError> {
        Ok(self
            .list_scheduled()
            .await?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect())
    }
}
