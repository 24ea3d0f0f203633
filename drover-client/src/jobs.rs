//! Job catalog and run requests

use crate::{OrchestratorClient, Result};
use drover_core::domain::job::JobIdentity;
use drover_core::dto::job::{
    JobDetail, JobSummary, RunJob, RunJobResponse, SyncReport, UpdateJobRecord,
};
use serde_json::Value;

impl OrchestratorClient {
    // =============================================================================
    // Job Catalog
    // =============================================================================

    /// List jobs, optionally including hidden ones
    pub async fn list_jobs(&self, include_hidden: bool) -> Result<Vec<JobSummary>> {
        tracing::debug!("Listing jobs");
        let response = self
            .get("/jobs")
            .query(&[("include_hidden", include_hidden)])
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Get a job with its variables and effective time limits
    pub async fn get_job(&self, identity: &JobIdentity) -> Result<JobDetail> {
        let response = self.get(&format!("/jobs/{}", identity)).send().await?;
        self.handle_response(response).await
    }

    /// Update a job record (enable/disable, queue, display overrides)
    ///
    /// # Example
    /// ```no_run
    /// # use drover_client::OrchestratorClient;
    /// # use drover_core::dto::job::UpdateJobRecord;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let identity = "plugin.drover_builtin.examples.Hello".parse()?;
    /// let update = UpdateJobRecord {
    ///     enabled: Some(true),
    ///     ..Default::default()
    /// };
    /// client.update_job(&identity, &update).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn update_job(
        &self,
        identity: &JobIdentity,
        update: &UpdateJobRecord,
    ) -> Result<JobSummary> {
        let response = self
            .patch(&format!("/jobs/{}", identity))
            .json(update)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Get the parameter schema of a job's variables
    pub async fn job_form(&self, identity: &JobIdentity) -> Result<Value> {
        let response = self.get(&format!("/jobs/{}/form", identity)).send().await?;
        self.handle_response(response).await
    }

    /// Rediscover job sources and sync records
    pub async fn refresh_jobs(&self) -> Result<SyncReport> {
        let response = self.post("/jobs/refresh").send().await?;
        self.handle_response(response).await
    }

    // =============================================================================
    // Running Jobs
    // =============================================================================

    /// Request a run; the job is enqueued or held for approval/scheduling
    pub async fn run_job(&self, identity: &JobIdentity, request: &RunJob) -> Result<RunJobResponse> {
        tracing::debug!("Requesting run of {}", identity);
        let response = self
            .post(&format!("/jobs/{}/run", identity))
            .json(request)
            .send()
            .await?;
        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use crate::OrchestratorClient;
    use crate::test_support::serve;
    use axum::{Json, Router, extract::Path, http::HeaderMap, http::StatusCode, routing::post};
    use drover_core::dto::job::{RunJob, RunJobResponse};
    use serde_json::{Value, json};
    use uuid::Uuid;

    async fn echo_run(
        Path(identity): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if body["data"]["who"] == "nobody" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid job variables",
                    "fields": [{ "field": "who", "message": "unknown person" }],
                })),
            );
        }
        let user = headers
            .get("x-drover-user")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("anonymous");
        assert_eq!(identity, "plugin.drover_builtin.examples.Hello");
        assert_eq!(user, "alice");
        (
            StatusCode::ACCEPTED,
            Json(json!({ "outcome": "enqueued", "result_id": Uuid::nil() })),
        )
    }

    fn app() -> Router {
        Router::new().route("/jobs/{identity}/run", post(echo_run))
    }

    #[tokio::test]
    async fn test_run_job_sends_user_and_parses_outcome() {
        let base = serve(app()).await;
        let client = OrchestratorClient::new(format!("{}/", base)).with_user("alice");
        let identity = "plugin.drover_builtin.examples.Hello".parse().unwrap();

        let mut request = RunJob::default();
        request.data.insert("who".into(), json!("API"));
        let response = client.run_job(&identity, &request).await.unwrap();
        assert_eq!(
            response,
            RunJobResponse::Enqueued {
                result_id: Uuid::nil()
            }
        );
    }

    #[tokio::test]
    async fn test_run_job_validation_error() {
        let base = serve(app()).await;
        let client = OrchestratorClient::new(base).with_user("alice");
        let identity = "plugin.drover_builtin.examples.Hello".parse().unwrap();

        let mut request = RunJob::default();
        request.data.insert("who".into(), json!("nobody"));
        let err = client.run_job(&identity, &request).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.fields()[0].field, "who");
    }
}
