//! Configuration module
//!
//! Handles CLI configuration: where the service lives and who is acting.

use drover_client::OrchestratorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the Drover service
    pub url: String,
    /// Principal sent as `X-Drover-User`
    pub user: Option<String>,
}

impl Config {
    pub fn client(&self) -> OrchestratorClient {
        let client = OrchestratorClient::new(&self.url);
        match &self.user {
            Some(user) => client.with_user(user),
            None => client,
        }
    }
}
