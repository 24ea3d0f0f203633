//! Error types for the Drover client

use drover_core::dto::job::FieldError;
use serde::Deserialize;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when using the Drover client
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error status code
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
        /// Per-variable validation failures, if any
        fields: Vec<FieldError>,
    },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Gave up waiting on the service
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// JSON error body returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    fields: Vec<FieldError>,
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Build an API error from a raw response body
    ///
    /// Falls back to the raw text when the body isn't the service's JSON shape.
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => Self::ApiError {
                status,
                message: parsed.error,
                fields: parsed.fields,
            },
            Err(_) => Self::api_error(status, body),
        }
    }

    /// Validation failures carried by the error
    pub fn fields(&self) -> &[FieldError] {
        match self {
            Self::ApiError { fields, .. } => fields,
            _ => &[],
        }
    }

    /// HTTP status of an API error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if this error is a client error (4xx status)
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(status) if (400..500).contains(&status))
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(status) if status >= 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_body() {
        let err = ClientError::from_body(
            400,
            r#"{"error":"invalid job variables","fields":[{"field":"who","message":"expected a string"}]}"#,
        );
        assert_eq!(err.status(), Some(400));
        assert!(err.is_client_error());
        assert_eq!(err.fields(), &[FieldError::new("who", "expected a string")]);
        assert!(err.to_string().contains("invalid job variables"));
    }

    #[test]
    fn test_from_plain_body() {
        let err = ClientError::from_body(502, "Bad Gateway");
        assert!(err.is_server_error());
        assert!(err.fields().is_empty());
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_not_found() {
        assert!(ClientError::api_error(404, "missing").is_not_found());
        assert!(!ClientError::Timeout("x".into()).is_not_found());
    }
}
