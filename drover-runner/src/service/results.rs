//! Result service
//!
//! Creation, logging, file output and finalization of job results on top of
//! a [`ResultRepository`].

use chrono::Utc;
use drover_core::domain::file::JobFile;
use drover_core::domain::job::JobRecord;
use drover_core::domain::log::{JobLogEntry, LogLevel};
use drover_core::domain::result::{JobResult, JobStatus};
use drover_core::dto::result::ResultQuery;
use drover_jobs::{JobDescriptor, LogOptions, LogRecord, Sanitizer};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::repository::{Outcome, ResultRepository, StoreError};

pub struct ResultService {
    repository: Arc<dyn ResultRepository>,
    sanitizer: Arc<Sanitizer>,
    file_max_size: u64,
}

impl ResultService {
    pub fn new(
        repository: Arc<dyn ResultRepository>,
        sanitizer: Arc<Sanitizer>,
        file_max_size: u64,
    ) -> Self {
        Self {
            repository,
            sanitizer,
            file_max_size,
        }
    }

    pub fn sanitizer(&self) -> &Arc<Sanitizer> {
        &self.sanitizer
    }

    /// Creates a `PENDING` result for a run about to be enqueued
    ///
    /// `kwargs` is dropped for jobs with sensitive variables.
    pub async fn create_result(
        &self,
        descriptor: &JobDescriptor,
        record: &JobRecord,
        user: &str,
        kwargs: Option<Value>,
        scheduled_job_id: Option<Uuid>,
    ) -> Result<JobResult, StoreError> {
        let result = JobResult {
            id: Uuid::new_v4(),
            job_identity: descriptor.identity.clone(),
            job_name: record.display_name().to_string(),
            user: user.to_string(),
            status: JobStatus::Pending,
            task_queue: record.queue.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            traceback: None,
            error_kind: None,
            task_kwargs: kwargs.filter(|_| !descriptor.meta.sensitive_variables),
            scheduled_job_id,
        };
        self.repository.insert_result(&result).await?;

        debug!("Created job result {} for {}", result.id, result.job_identity);
        Ok(result)
    }

    /// Sanitizes and records one log line outside of a running job
    pub async fn append(
        &self,
        result_id: Uuid,
        level: LogLevel,
        message: &str,
        options: LogOptions,
    ) -> Result<(), StoreError> {
        let message = self.sanitizer.sanitize(message);
        info!(job_result = %result_id, level = %level, "{}", message);

        if !options.persist {
            return Ok(());
        }
        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            message,
            grouping: options.grouping,
            object: options.object,
        };
        self.repository.append_logs(result_id, &[record]).await
    }

    /// Persists already sanitized records in order
    pub async fn append_records(
        &self,
        result_id: Uuid,
        records: &[LogRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        self.repository.append_logs(result_id, records).await
    }

    pub async fn mark_running(&self, result_id: Uuid) -> Result<(), StoreError> {
        self.repository.mark_running(result_id, Utc::now()).await
    }

    /// Single terminal write of a result
    pub async fn finalize(&self, result_id: Uuid, outcome: Outcome) -> Result<JobResult, StoreError> {
        let result = self
            .repository
            .finalize(result_id, &outcome, Utc::now())
            .await?;
        info!(
            "Job result {} ({}) finished with status {}",
            result.id, result.job_identity, result.status
        );
        Ok(result)
    }

    pub async fn create_file(
        &self,
        result_id: Uuid,
        name: &str,
        content: Vec<u8>,
    ) -> Result<JobFile, StoreError> {
        let size = content.len() as u64;
        if size > self.file_max_size {
            return Err(StoreError::FileTooLarge {
                name: name.to_string(),
                size,
                max: self.file_max_size,
            });
        }

        let file = JobFile {
            id: Uuid::new_v4(),
            result_id,
            name: name.to_string(),
            size,
            created_at: Utc::now(),
        };
        self.repository.insert_file(&file, &content).await?;
        Ok(file)
    }

    pub async fn get(&self, result_id: Uuid) -> Result<JobResult, StoreError> {
        self.repository
            .get_result(result_id)
            .await?
            .ok_or(StoreError::ResultNotFound(result_id))
    }

    pub async fn list(&self, query: &ResultQuery) -> Result<Vec<JobResult>, StoreError> {
        self.repository.list_results(query).await
    }

    pub async fn logs(&self, result_id: Uuid) -> Result<Vec<JobLogEntry>, StoreError> {
        self.get(result_id).await?;
        self.repository.logs(result_id).await
    }

    pub async fn files(&self, result_id: Uuid) -> Result<Vec<JobFile>, StoreError> {
        self.get(result_id).await?;
        self.repository.files(result_id).await
    }

    pub async fn file_content(
        &self,
        result_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<(JobFile, Vec<u8>)>, StoreError> {
        self.repository.file_content(result_id, file_id).await
    }

    /// Deletes a result together with its log entries and files
    pub async fn delete(&self, result_id: Uuid) -> Result<(), StoreError> {
        if !self.repository.delete_result(result_id).await? {
            return Err(StoreError::ResultNotFound(result_id));
        }
        info!("Deleted job result {}", result_id);
        Ok(())
    }
}
