//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use drover_core::dto::job::FieldError;
use drover_runner::{DispatchError, RegistryError, StoreError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    /// Rejected job data, reported per field
    Validation(Vec<FieldError>),
    /// Valid request the job cannot honor (sensitive data on a held run)
    Unsupported(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, None),
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "Invalid job data".to_string(),
                Some(errors),
            ),
            ApiError::Unsupported(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = match fields {
            Some(fields) => serde_json::json!({ "error": message, "fields": fields }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ResultNotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::AlreadyFinalized(_) => ApiError::Conflict(err.to_string()),
            StoreError::FileTooLarge { .. } => ApiError::BadRequest(err.to_string()),
            StoreError::Backend(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::Disabled(_) => ApiError::Forbidden(err.to_string()),
            RegistryError::Store(e) => e.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::JobNotFound(_) | DispatchError::ScheduledJobNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            DispatchError::Disabled(_) | DispatchError::Forbidden(_) => {
                ApiError::Forbidden(err.to_string())
            }
            DispatchError::Validation(errors) => ApiError::Validation(errors),
            DispatchError::Unsupported(msg) => ApiError::Unsupported(msg),
            DispatchError::InvalidState(msg) => ApiError::Conflict(msg),
            DispatchError::Store(e) => e.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
