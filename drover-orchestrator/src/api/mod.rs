//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod result;
pub mod schedule;

use axum::{
    Router,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
};
use drover_runner::{JobDispatcher, JobRegistry, ResultService};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Header carrying the acting principal
pub const USER_HEADER: &str = "x-drover-user";

/// Principal used when the header is missing
pub const ANONYMOUS: &str = "anonymous";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub dispatcher: Arc<JobDispatcher>,
    pub results: Arc<ResultService>,
}

/// Acting principal, from the `X-Drover-User` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(ANONYMOUS);
        Ok(Principal(user.to_string()))
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/jobs", get(job::list_jobs))
        .route("/jobs/refresh", post(job::refresh_jobs))
        .route("/jobs/{identity}", get(job::get_job).patch(job::update_job))
        .route("/jobs/{identity}/form", get(job::get_form))
        .route("/jobs/{identity}/run", post(job::run_job))
        // Result endpoints
        .route("/job-results", get(result::list_results))
        .route(
            "/job-results/{id}",
            get(result::get_result).delete(result::delete_result),
        )
        .route("/job-results/{id}/logs", get(result::get_logs))
        .route("/job-results/{id}/files", get(result::list_files))
        .route("/job-results/{id}/files/{file_id}", get(result::download_file))
        // Scheduled job endpoints
        .route("/scheduled-jobs", get(schedule::list_scheduled))
        .route("/scheduled-jobs/{id}", get(schedule::get_scheduled))
        .route("/scheduled-jobs/{id}/approve", post(schedule::approve))
        .route("/scheduled-jobs/{id}/deny", post(schedule::deny))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::builtin::BuiltinJobs;
    use drover_core::dto::job::UpdateJobRecord;
    use drover_jobs::{MemoryObjects, Sanitizer, TimeLimits};
    use drover_runner::{
        AllowAll, JobRunner, MemoryLock, MemoryStore, RecordRepository, WorkerPool,
    };
    use std::time::Duration;

    /// Serves the API over in-memory stores with every builtin job enabled
    ///
    /// Returns the base URL.
    pub async fn serve() -> String {
        let store = Arc::new(MemoryStore::new());
        let results = Arc::new(ResultService::new(
            store.clone(),
            Arc::new(Sanitizer::default()),
            1024,
        ));
        let runner = Arc::new(JobRunner::new(
            results.clone(),
            Arc::new(MemoryLock::new()),
            Duration::from_millis(10),
        ));
        let registry = Arc::new(JobRegistry::new(
            vec![Arc::new(BuiltinJobs)],
            TimeLimits::from_secs(5, 10),
            "default",
            store.clone(),
        ));
        registry.discover().await.unwrap();
        registry.sync().await.unwrap();
        for record in store.list_records().await.unwrap() {
            registry
                .update_record(
                    &record.identity,
                    UpdateJobRecord {
                        enabled: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let dispatcher = Arc::new(JobDispatcher::new(
            registry.clone(),
            results.clone(),
            store,
            runner,
            Arc::new(WorkerPool::new(2)),
            Arc::new(MemoryObjects::new()),
            Arc::new(AllowAll),
        ));
        let app = create_router(AppState {
            registry,
            dispatcher,
            results,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
