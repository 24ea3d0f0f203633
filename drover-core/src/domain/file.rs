//! Output file domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file produced by a job execution
///
/// Persists independently of the result's log, deleted with the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    pub id: Uuid,
    pub result_id: Uuid,
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}
