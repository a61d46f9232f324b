//! Obtaining the credentials for a practice room.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kiyomi_core::{ConnectionDetails, Scenario, UserProfile};
use tracing::{debug, instrument};

/// Exchanges a scenario and a user profile for room connection details.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, scenario: &Scenario, profile: &UserProfile) -> Result<ConnectionDetails>;
}

/// Asks the Kiyomi backend for connection details.
pub struct HttpTokenIssuer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenIssuer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    #[instrument(skip(self, scenario, profile), fields(scenario = %scenario.id))]
    async fn issue(&self, scenario: &Scenario, profile: &UserProfile) -> Result<ConnectionDetails> {
        let scenario_data = serde_json::to_string(scenario)?;
        let url = format!("{}/api/connection-details", self.base_url);
        let details = self
            .client
            .get(&url)
            .query(&[
                ("scenarioData", scenario_data.as_str()),
                ("userName", profile.name.as_str()),
                ("userGender", profile.gender.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .context("Connection details request was rejected")?
            .json::<ConnectionDetails>()
            .await
            .context("Malformed connection details")?;
        debug!(room = %details.room_name, "Received connection details");
        Ok(details)
    }
}
