//! Job result DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::JobIdentity;
use crate::domain::result::JobStatus;

/// Filters for listing job results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultQuery {
    pub job: Option<JobIdentity>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}
