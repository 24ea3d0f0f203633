//! In-memory repositories

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::domain::file::JobFile;
use drover_core::domain::job::{JobIdentity, JobRecord};
use drover_core::domain::log::JobLogEntry;
use drover_core::domain::result::{JobResult, JobStatus};
use drover_core::domain::schedule::{ScheduleInterval, ScheduledJob};
use drover_core::dto::result::ResultQuery;
use drover_jobs::LogRecord;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    Outcome, RecordRepository, ResultRepository, ScheduleRepository, StoreError,
};

#[derive(Default)]
struct State {
    records: BTreeMap<JobIdentity, JobRecord>,
    results: HashMap<Uuid, JobResult>,
    logs: HashMap<Uuid, Vec<JobLogEntry>>,
    files: HashMap<Uuid, Vec<(JobFile, Vec<u8>)>>,
    scheduled: HashMap<Uuid, ScheduledJob>,
}

/// Every repository over one mutex-guarded state
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordRepository for MemoryStore {
    async fn list_records(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.state().records.values().cloned().collect())
    }

    async fn get_record(&self, identity: &JobIdentity) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.state().records.get(identity).cloned())
    }

    async fn save_record(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.state()
            .records
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, identity: &JobIdentity) -> Result<bool, StoreError> {
        Ok(self.state().records.remove(identity).is_some())
    }
}

#[async_trait]
impl ResultRepository for MemoryStore {
    async fn insert_result(&self, result: &JobResult) -> Result<(), StoreError> {
        self.state().results.insert(result.id, result.clone());
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<JobResult>, StoreError> {
        Ok(self.state().results.get(&id).cloned())
    }

    async fn list_results(&self, query: &ResultQuery) -> Result<Vec<JobResult>, StoreError> {
        let mut results: Vec<JobResult> = self
            .state()
            .results
            .values()
            .filter(|r| query.job.as_ref().is_none_or(|job| r.job_identity == *job))
            .filter(|r| query.status.is_none_or(|status| r.status == status))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn mark_running(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state();
        let result = state
            .results
            .get_mut(&id)
            .ok_or(StoreError::ResultNotFound(id))?;
        if result.status == JobStatus::Pending {
            result.status = JobStatus::Running;
            result.started_at = Some(started_at);
        }
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        outcome: &Outcome,
        completed_at: DateTime<Utc>,
    ) -> Result<JobResult, StoreError> {
        let mut state = self.state();
        let result = state
            .results
            .get_mut(&id)
            .ok_or(StoreError::ResultNotFound(id))?;
        if result.is_finished() {
            return Err(StoreError::AlreadyFinalized(id));
        }
        result.status = outcome.status;
        result.result = outcome.result.clone();
        result.traceback = outcome.traceback.clone();
        result.error_kind = outcome.error_kind;
        result.completed_at = Some(completed_at);
        Ok(result.clone())
    }

    async fn delete_result(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state();
        state.logs.remove(&id);
        state.files.remove(&id);
        Ok(state.results.remove(&id).is_some())
    }

    async fn append_logs(&self, result_id: Uuid, records: &[LogRecord]) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.results.contains_key(&result_id) {
            return Err(StoreError::ResultNotFound(result_id));
        }
        let entries = state.logs.entry(result_id).or_default();
        let mut sequence = entries.last().map(|e| e.sequence).unwrap_or(0);
        for record in records {
            sequence += 1;
            entries.push(JobLogEntry {
                id: Uuid::new_v4(),
                result_id,
                sequence,
                timestamp: record.timestamp,
                level: record.level,
                message: record.message.clone(),
                grouping: record.grouping.clone(),
                object: record.object.clone(),
            });
        }
        Ok(())
    }

    async fn logs(&self, result_id: Uuid) -> Result<Vec<JobLogEntry>, StoreError> {
        Ok(self
            .state()
            .logs
            .get(&result_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_file(&self, file: &JobFile, content: &[u8]) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state.results.contains_key(&file.result_id) {
            return Err(StoreError::ResultNotFound(file.result_id));
        }
        state
            .files
            .entry(file.result_id)
            .or_default()
            .push((file.clone(), content.to_vec()));
        Ok(())
    }

    async fn files(&self, result_id: Uuid) -> Result<Vec<JobFile>, StoreError> {
        Ok(self
            .state()
            .files
            .get(&result_id)
            .map(|files| files.iter().map(|(file, _)| file.clone()).collect())
            .unwrap_or_default())
    }

    async fn file_content(
        &self,
        result_id: Uuid,
        file_id: Uuid,
    ) -> Result<Option<(JobFile, Vec<u8>)>, StoreError> {
        Ok(self
            .state()
            .files
            .get(&result_id)
            .and_then(|files| files.iter().find(|(file, _)| file.id == file_id))
            .cloned())
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn insert_scheduled(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        self.state().scheduled.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_scheduled(&self, id: Uuid) -> Result<Option<ScheduledJob>, StoreError> {
        Ok(self.state().scheduled.get(&id).cloned())
    }

    async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        let mut jobs: Vec<ScheduledJob> = self.state().scheduled.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn update_scheduled(&self, job: &ScheduledJob) -> Result<(), StoreError> {
        self.state().scheduled.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_approval(
        &self,
        id: Uuid,
        approver: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>, StoreError> {
        let mut state = self.state();
        let Some(job) = state.scheduled.get_mut(&id) else {
            return Ok(None);
        };
        if !job.is_awaiting_approval() {
            return Ok(None);
        }

        job.approved_by = Some(approver.to_string());
        job.approved_at = Some(approved_at);
        if job.interval == ScheduleInterval::Immediately {
            job.enabled = false;
        }
        Ok(Some(job.clone()))
    }

    async fn delete_scheduled(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state().scheduled.remove(&id).is_some())
    }
}
