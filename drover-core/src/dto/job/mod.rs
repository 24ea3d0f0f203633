//! Job DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::job::{JobIdentity, JobMeta, JobRecord};
use crate::domain::schedule::ScheduleInterval;
use crate::domain::variable::VariableDefinition;

/// A job as listed by the service: durable record joined with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub identity: JobIdentity,
    pub name: String,
    pub grouping: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub installed: bool,
    pub queue: String,
    pub approval_required: bool,
    pub sensitive_variables: bool,
    pub singleton: bool,
    pub hidden: bool,
}

impl JobSummary {
    pub fn new(record: &JobRecord, meta: &JobMeta) -> Self {
        Self {
            identity: record.identity.clone(),
            name: record.display_name().to_string(),
            grouping: record.display_grouping().to_string(),
            description: record.display_description().map(str::to_string),
            enabled: record.enabled,
            installed: record.installed,
            queue: record.queue.clone(),
            approval_required: meta.approval_required,
            sensitive_variables: meta.sensitive_variables,
            singleton: meta.singleton,
            hidden: meta.hidden,
        }
    }
}

/// Full job view including its variables and effective time limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub variables: Vec<VariableDefinition>,
    pub soft_time_limit: u64,
    pub time_limit: u64,
    pub record: JobRecord,
}

/// Partial update of a job record
///
/// `Some("")` clears an override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJobRecord {
    pub enabled: Option<bool>,
    pub queue: Option<String>,
    pub name_override: Option<String>,
    pub grouping_override: Option<String>,
    pub description_override: Option<String>,
}

/// Request to run a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunJob {
    /// Raw values keyed by variable name
    #[serde(default)]
    pub data: Map<String, Value>,
    pub schedule: Option<ScheduleRequest>,
    /// Steal the singleton lock from a crashed holder
    #[serde(default)]
    pub force_release: bool,
}

/// Deferred or recurring execution of a run request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub interval: ScheduleInterval,
    pub start_time: Option<DateTime<Utc>>,
    pub name: Option<String>,
}

/// Outcome of a run request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunJobResponse {
    /// Dispatched to the executor
    Enqueued { result_id: Uuid },
    /// Held until approved and/or due
    Scheduled {
        scheduled_job_id: Uuid,
        approval_required: bool,
    },
}

/// Field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Changes applied by a registry sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: Vec<JobIdentity>,
    pub updated: Vec<JobIdentity>,
    pub removed: Vec<JobIdentity>,
}

impl SyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_job_defaults() {
        let req: RunJob = serde_json::from_value(serde_json::json!({
            "data": { "who": "world" }
        }))
        .unwrap();
        assert_eq!(req.data["who"], "world");
        assert!(req.schedule.is_none());
        assert!(!req.force_release);
    }

    #[test]
    fn test_run_job_response_tagging() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(RunJobResponse::Enqueued { result_id: id }).unwrap();
        assert_eq!(json["outcome"], "enqueued");
        assert_eq!(json["result_id"], id.to_string());
    }
}
