//! Scheduled jobs and approvals

use crate::{OrchestratorClient, Result};
use drover_core::domain::schedule::ScheduledJob;
use drover_core::dto::schedule::ApprovalOutcome;
use uuid::Uuid;

impl OrchestratorClient {
    /// List held runs
    pub async fn list_scheduled(&self) -> Result<Vec<ScheduledJob>> {
        let response = self.get("/scheduled-jobs").send().await?;
        self.handle_response(response).await
    }

    pub async fn get_scheduled(&self, id: Uuid) -> Result<ScheduledJob> {
        let response = self.get(&format!("/scheduled-jobs/{}", id)).send().await?;
        self.handle_response(response).await
    }

    /// Approve a held run as the client's user
    ///
    /// Immediate runs are dispatched right away and carry a result id.
    pub async fn approve(&self, id: Uuid) -> Result<ApprovalOutcome> {
        tracing::debug!("Approving scheduled job {}", id);
        let response = self
            .post(&format!("/scheduled-jobs/{}/approve", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Deny (or, for the requester, withdraw) a held run
    pub async fn deny(&self, id: Uuid) -> Result<ScheduledJob> {
        tracing::debug!("Denying scheduled job {}", id);
        let response = self
            .post(&format!("/scheduled-jobs/{}/deny", id))
            .send()
            .await?;
        self.handle_response(response).await
    }
}
