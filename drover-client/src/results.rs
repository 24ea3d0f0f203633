//! Job results, logs and output files

use crate::{ClientError, OrchestratorClient, Result};
use drover_core::domain::file::JobFile;
use drover_core::domain::log::JobLogEntry;
use drover_core::domain::result::JobResult;
use drover_core::dto::result::ResultQuery;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

impl OrchestratorClient {
    /// List job results, newest first
    pub async fn list_results(&self, query: &ResultQuery) -> Result<Vec<JobResult>> {
        let response = self.get("/job-results").query(query).send().await?;
        self.handle_response(response).await
    }

    /// Get a specific job result
    pub async fn get_result(&self, id: Uuid) -> Result<JobResult> {
        let response = self.get(&format!("/job-results/{}", id)).send().await?;
        self.handle_response(response).await
    }

    /// Delete a job result with its logs and files
    pub async fn delete_result(&self, id: Uuid) -> Result<()> {
        let response = self.delete(&format!("/job-results/{}", id)).send().await?;
        self.handle_empty_response(response).await
    }

    /// Get the log entries of a job result, in emission order
    pub async fn result_logs(&self, id: Uuid) -> Result<Vec<JobLogEntry>> {
        let response = self
            .get(&format!("/job-results/{}/logs", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// List the output files of a job result
    pub async fn result_files(&self, id: Uuid) -> Result<Vec<JobFile>> {
        let response = self
            .get(&format!("/job-results/{}/files", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Download the content of an output file
    pub async fn download_file(&self, id: Uuid, file_id: Uuid) -> Result<Vec<u8>> {
        let response = self
            .get(&format!("/job-results/{}/files/{}", id, file_id))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Poll a job result until it reaches SUCCESS or FAILURE
    pub async fn wait_for_result(
        &self,
        id: Uuid,
        interval: Duration,
        timeout: Duration,
    ) -> Result<JobResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let result = self.get_result(id).await?;
            if result.is_finished() {
                return Ok(result);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout(format!(
                    "job result {} still {} after {:?}",
                    id, result.status, timeout
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::OrchestratorClient;
    use crate::test_support::serve;
    use axum::{Json, Router, extract::Path, extract::RawQuery, routing::get};
    use drover_core::domain::result::JobStatus;
    use drover_core::dto::result::ResultQuery;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn result_json(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "job_identity": "plugin.drover_builtin.examples.Hello",
            "job_name": "Hello",
            "user": "alice",
            "status": status,
            "task_queue": "default",
            "created_at": "2026-01-01T00:00:00Z",
            "started_at": null,
            "completed_at": null,
            "result": null,
            "traceback": null,
            "error_kind": null,
            "task_kwargs": null,
            "scheduled_job_id": null,
        })
    }

    #[tokio::test]
    async fn test_list_results_query_string() {
        let seen = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let app = Router::new().route(
            "/job-results",
            get(move |RawQuery(query): RawQuery| {
                let captured = captured.clone();
                async move {
                    *captured.lock().unwrap() = query;
                    Json(json!([]))
                }
            }),
        );
        let base = serve(app).await;
        let client = OrchestratorClient::new(base);

        let query = ResultQuery {
            job: Some("plugin.drover_builtin.examples.Hello".parse().unwrap()),
            status: Some(JobStatus::Success),
            limit: None,
        };
        let results = client.list_results(&query).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("job=plugin.drover_builtin.examples.Hello&status=SUCCESS")
        );
    }

    #[tokio::test]
    async fn test_wait_for_result_polls_until_terminal() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let app = Router::new().route(
            "/job-results/{id}",
            get(move |Path(id): Path<String>| {
                let counter = counter.clone();
                async move {
                    let status = if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        "RUNNING"
                    } else {
                        "SUCCESS"
                    };
                    Json(result_json(&id, status))
                }
            }),
        );
        let base = serve(app).await;
        let client = OrchestratorClient::new(base);

        let result = client
            .wait_for_result(Uuid::nil(), Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_for_result_times_out() {
        let app = Router::new().route(
            "/job-results/{id}",
            get(|Path(id): Path<String>| async move { Json(result_json(&id, "PENDING")) }),
        );
        let base = serve(app).await;
        let client = OrchestratorClient::new(base);

        let err = client
            .wait_for_result(Uuid::nil(), Duration::from_millis(5), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still PENDING"));
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let base = serve(Router::new()).await;
        let client = OrchestratorClient::new(base);

        let err = client
            .download_file(Uuid::nil(), Uuid::nil())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
