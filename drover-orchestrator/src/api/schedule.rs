//! Scheduled Job API Handlers
//!
//! Held runs: listing, approval and denial.

use axum::{
    Json,
    extract::{Path, State},
};
use drover_core::domain::schedule::ScheduledJob;
use drover_core::dto::schedule::ApprovalOutcome;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::api::{AppState, Principal};

/// GET /scheduled-jobs
pub async fn list_scheduled(State(state): State<AppState>) -> ApiResult<Json<Vec<ScheduledJob>>> {
    tracing::debug!("Listing scheduled jobs");

    let jobs = state.dispatcher.list_scheduled().await?;
    Ok(Json(jobs))
}

/// GET /scheduled-jobs/{id}
pub async fn get_scheduled(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ScheduledJob>> {
    let job = state.dispatcher.get_scheduled(id).await?;
    Ok(Json(job))
}

/// POST /scheduled-jobs/{id}/approve
/// Approves a held run; immediate runs are dispatched right away
pub async fn approve(
    State(state): State<AppState>,
    Principal(user): Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ApprovalOutcome>> {
    tracing::info!("Scheduled job {} approval by {}", id, user);

    let outcome = state.dispatcher.approve(id, &user).await?;
    Ok(Json(outcome))
}

/// POST /scheduled-jobs/{id}/deny
/// Denies (or withdraws) a held run, deleting it
pub async fn deny(
    State(state): State<AppState>,
    Principal(user): Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ScheduledJob>> {
    tracing::info!("Scheduled job {} denied by {}", id, user);

    let job = state.dispatcher.deny(id, &user).await?;
    Ok(Json(job))
}
