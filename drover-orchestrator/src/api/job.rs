//! Job API Handlers
//!
//! Catalog, record administration and run requests.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use drover_core::domain::job::JobIdentity;
use drover_core::dto::job::{
    JobDetail, JobSummary, RunJob, RunJobResponse, SyncReport, UpdateJobRecord,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::{AppState, Principal};

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub include_hidden: bool,
}

/// GET /jobs
/// List job records joined with their descriptors
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing jobs");

    let jobs = state
        .registry
        .list()
        .await?
        .into_iter()
        .filter(|(descriptor, _)| params.include_hidden || !descriptor.meta.hidden)
        .map(|(descriptor, record)| JobSummary::new(&record, &descriptor.meta))
        .collect();

    Ok(Json(jobs))
}

/// GET /jobs/{identity}
pub async fn get_job(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<JobDetail>> {
    let identity = parse_identity(&identity)?;
    tracing::debug!("Getting job: {}", identity);

    let (descriptor, record) = state.registry.get(&identity).await?;

    Ok(Json(JobDetail {
        summary: JobSummary::new(&record, &descriptor.meta),
        variables: descriptor.variables.clone(),
        soft_time_limit: descriptor.limits.soft.as_secs(),
        time_limit: descriptor.limits.hard.as_secs(),
        record,
    }))
}

/// PATCH /jobs/{identity}
/// Enable/disable a job, move it to another queue or override its display
pub async fn update_job(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Json(update): Json<UpdateJobRecord>,
) -> ApiResult<Json<JobSummary>> {
    let identity = parse_identity(&identity)?;
    tracing::info!("Updating job record: {}", identity);

    let record = state.registry.update_record(&identity, update).await?;
    let descriptor = state
        .registry
        .descriptor(&identity)
        .ok_or_else(|| ApiError::NotFound(format!("job {} not found", identity)))?;

    Ok(Json(JobSummary::new(&record, &descriptor.meta)))
}

/// GET /jobs/{identity}/form
/// Parameter schema of the job's variables
pub async fn get_form(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> ApiResult<Json<Value>> {
    let identity = parse_identity(&identity)?;
    let (descriptor, _) = state.registry.get(&identity).await?;

    Ok(Json(descriptor.schema().form_schema()))
}

/// POST /jobs/refresh
/// Rediscover every source and sync job records
pub async fn refresh_jobs(State(state): State<AppState>) -> ApiResult<Json<SyncReport>> {
    tracing::info!("Refreshing job registry");

    state
        .registry
        .discover()
        .await
        .map_err(|e| ApiError::InternalError(format!("Job discovery failed: {:#}", e)))?;
    for error in state.registry.errors() {
        tracing::warn!("Job registration error: {}", error);
    }

    let report = state.registry.sync().await?;
    tracing::info!(
        "Job sync complete: {} created, {} updated, {} removed",
        report.created.len(),
        report.updated.len(),
        report.removed.len()
    );

    Ok(Json(report))
}

/// POST /jobs/{identity}/run
/// Enqueue a run, or hold it for approval or a later start
pub async fn run_job(
    State(state): State<AppState>,
    Principal(user): Principal,
    Path(identity): Path<String>,
    Json(request): Json<RunJob>,
) -> ApiResult<(StatusCode, Json<RunJobResponse>)> {
    let identity = parse_identity(&identity)?;
    tracing::info!("Run of {} requested by {}", identity, user);

    let response = state.dispatcher.submit(&identity, &user, request).await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

fn parse_identity(raw: &str) -> ApiResult<JobIdentity> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid job identity: {}", e)))
}
