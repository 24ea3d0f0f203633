//! Drover HTTP Client
//!
//! A type-safe HTTP client for the Drover orchestrator API, used by the CLI
//! and by anything else that wants to run jobs remotely.
//!
//! # Example
//!
//! ```no_run
//! use drover_client::OrchestratorClient;
//! use drover_core::dto::job::RunJob;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080").with_user("alice");
//!
//!     let identity = "plugin.drover_builtin.examples.Hello".parse()?;
//!     let response = client.run_job(&identity, &RunJob::default()).await?;
//!
//!     println!("{:?}", response);
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod results;
mod schedules;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// Header carrying the acting principal
pub const USER_HEADER: &str = "X-Drover-User";

/// HTTP client for the Drover orchestrator API
///
/// Methods are organized into logical groups:
/// - Job catalog and administration (list, show, update, form, refresh)
/// - Running jobs
/// - Results, logs and files
/// - Scheduled jobs and approvals
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// Principal sent with every request; the service assumes `anonymous`
    user: Option<String>,
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use drover_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user: None,
            client,
        }
    }

    /// Act as `user` on every request
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(self.url(path)))
    }

    fn patch(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.patch(self.url(path)))
    }

    fn delete(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.delete(self.url(path)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.header(USER_HEADER, user),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await?;
        Ok(())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_body(status.as_u16(), &error_text));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.user(), None);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/jobs"), "http://localhost:8080/jobs");
    }

    #[test]
    fn test_client_with_custom_client_and_user() {
        let http_client = Client::new();
        let client =
            OrchestratorClient::with_client("http://localhost:8080", http_client).with_user("alice");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.user(), Some("alice"));
    }
}
