//! Scheduled job DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::schedule::ScheduledJob;

/// Outcome of approving a scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub scheduled_job: ScheduledJob,
    /// Set when the approval dispatched the job right away
    pub result_id: Option<Uuid>,
}
