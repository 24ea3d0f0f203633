//! Job result domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::job::JobIdentity;

/// One execution attempt of a job
///
/// Created when a run is enqueued, mutated only by the runner driving that
/// execution, retained until explicitly deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: Uuid,
    pub job_identity: JobIdentity,
    pub job_name: String,
    /// Principal that initiated the run
    pub user: String,
    pub status: JobStatus,
    pub task_queue: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Return value of the work function (never set for sensitive jobs)
    pub result: Option<serde_json::Value>,
    /// Error chain of an unhandled error
    pub traceback: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Re-serialized arguments (never set for sensitive jobs)
    pub task_kwargs: Option<serde_json::Value>,
    pub scheduled_job_id: Option<Uuid>,
}

impl JobResult {
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Why an execution ended in `FAILURE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Singleton lock already held by another execution
    LockConflict,
    /// A lifecycle hook or the work function raised
    HookError,
    /// The work function called `fail()`
    SoftFailure,
    /// Hard time limit reached
    TimeExceeded,
    /// Lock or result backend failed before the job could start
    StorageError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LockConflict => "lock_conflict",
            ErrorKind::HookError => "hook_error",
            ErrorKind::SoftFailure => "soft_failure",
            ErrorKind::TimeExceeded => "time_exceeded",
            ErrorKind::StorageError => "storage_error",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock_conflict" => Ok(ErrorKind::LockConflict),
            "hook_error" => Ok(ErrorKind::HookError),
            "soft_failure" => Ok(ErrorKind::SoftFailure),
            "time_exceeded" => Ok(ErrorKind::TimeExceeded),
            "storage_error" => Ok(ErrorKind::StorageError),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}
