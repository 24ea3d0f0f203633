//! Job Result API Handlers
//!
//! Execution records with their logs and output files.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use drover_core::domain::file::JobFile;
use drover_core::domain::log::JobLogEntry;
use drover_core::domain::result::JobResult;
use drover_core::dto::result::ResultQuery;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// GET /job-results
/// Newest first, filtered by `job`, `status` and `limit`
pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ResultQuery>,
) -> ApiResult<Json<Vec<JobResult>>> {
    tracing::debug!("Listing job results: {:?}", query);

    let results = state.results.list(&query).await?;
    Ok(Json(results))
}

/// GET /job-results/{id}
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobResult>> {
    tracing::debug!("Getting job result: {}", id);

    let result = state.results.get(id).await?;
    Ok(Json(result))
}

/// DELETE /job-results/{id}
/// Deletes the result with its logs and files
pub async fn delete_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting job result: {}", id);

    state.results.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /job-results/{id}/logs
pub async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<JobLogEntry>>> {
    tracing::debug!("Getting logs for job result: {}", id);

    // Verify the result exists first
    state.results.get(id).await?;

    let logs = state.results.logs(id).await?;
    Ok(Json(logs))
}

/// GET /job-results/{id}/files
pub async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<JobFile>>> {
    state.results.get(id).await?;

    let files = state.results.files(id).await?;
    Ok(Json(files))
}

/// GET /job-results/{id}/files/{file_id}
/// Raw file content as an attachment
pub async fn download_file(
    State(state): State<AppState>,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Response> {
    let (file, content) = state
        .results
        .file_content(id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("file {} of job result {} not found", file_id, id)))?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.name.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::serve;
    use serde_json::{Value, json};
    use std::time::Duration;

    async fn run_and_wait(client: &reqwest::Client, base: &str, identity: &str, data: Value) -> Value {
        let body: Value = client
            .post(format!("{}/jobs/{}/run", base, identity))
            .header("X-Drover-User", "alice")
            .json(&json!({ "data": data }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = body["result_id"].as_str().unwrap().to_string();

        for _ in 0..500 {
            let result: Value = client
                .get(format!("{}/job-results/{}", base, id))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if result["status"] == "SUCCESS" || result["status"] == "FAILURE" {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job result {} did not finish", id);
    }

    #[tokio::test]
    async fn test_result_logs_and_delete() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let result = run_and_wait(
            &client,
            &base,
            "plugin.drover_builtin.examples.Hello",
            json!({ "who": "API" }),
        )
        .await;
        assert_eq!(result["status"], "SUCCESS");
        assert_eq!(result["user"], "alice");
        assert_eq!(result["result"], "Hello, API!");
        let id = result["id"].as_str().unwrap();

        let logs: Vec<Value> = client
            .get(format!("{}/job-results/{}/logs", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(logs.iter().any(|entry| entry["message"] == "Hello, API!"));

        let listed: Vec<Value> = client
            .get(format!(
                "{}/job-results?job=plugin.drover_builtin.examples.Hello&status=SUCCESS",
                base
            ))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let deleted = client
            .delete(format!("{}/job-results/{}", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), 204);

        let gone = client
            .get(format!("{}/job-results/{}/logs", base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(gone.status(), 404);
    }

    #[tokio::test]
    async fn test_default_greeting() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let result = run_and_wait(
            &client,
            &base,
            "plugin.drover_builtin.examples.Hello",
            json!({}),
        )
        .await;
        assert_eq!(result["status"], "SUCCESS");
        assert_eq!(result["result"], "Hello, world!");
        assert!(result["started_at"].is_string());

        let logs: Vec<Value> = client
            .get(format!("{}/job-results/{}/logs", base, result["id"].as_str().unwrap()))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let greetings: Vec<&Value> = logs
            .iter()
            .filter(|entry| {
                entry["level"] == "info"
                    && entry["message"].as_str().is_some_and(|m| m.contains("world"))
            })
            .collect();
        assert_eq!(greetings.len(), 1);
    }

    #[tokio::test]
    async fn test_file_download() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let result = run_and_wait(
            &client,
            &base,
            "plugin.drover_builtin.examples.Echo",
            json!({ "message": "a,b", "dryrun": true }),
        )
        .await;
        assert_eq!(result["status"], "SUCCESS");
        let id = result["id"].as_str().unwrap();

        let files: Vec<Value> = client
            .get(format!("{}/job-results/{}/files", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["name"], "echo.txt");

        let response = client
            .get(format!(
                "{}/job-results/{}/files/{}",
                base,
                id,
                files[0]["id"].as_str().unwrap()
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(
            response.headers()["content-disposition"]
                .to_str()
                .unwrap()
                .contains("echo.txt")
        );
        assert_eq!(response.text().await.unwrap(), "a,b");
    }
}
