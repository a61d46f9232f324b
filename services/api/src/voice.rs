//! LiveKit Room Credentials
//!
//! Every practice call gets a fresh room. The joining user receives a token
//! that carries the chosen scenario and their profile as participant metadata,
//! which is where the practice agent reads them from.

use crate::config::LiveKitConfig;
use kiyomi_core::{ConnectionDetails, Scenario, UserProfile};
use livekit_api::access_token::{AccessToken, AccessTokenError, VideoGrants};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("LiveKit token error: {0}")]
    Token(#[from] AccessTokenError),
    #[error("Failed to encode participant metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// What the practice agent needs to know about the user it is talking to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParticipantMetadata {
    pub skill: String,
    #[serde(rename = "scenarioName")]
    pub scenario_name: String,
    pub scenario: Scenario,
    pub user_name: String,
    pub user_gender: String,
}

pub struct VoiceTokenService {
    config: LiveKitConfig,
}

impl VoiceTokenService {
    pub fn new(config: LiveKitConfig) -> Self {
        Self { config }
    }

    /// Creates a room name and a join token for one practice call.
    pub fn issue(
        &self,
        scenario: &Scenario,
        profile: &UserProfile,
    ) -> Result<ConnectionDetails, VoiceError> {
        let room_name = format!("practice_{}", Uuid::new_v4().simple());
        let identity = format!("user_{}", Uuid::new_v4().simple());
        let participant_name = if profile.name.trim().is_empty() {
            "user".to_string()
        } else {
            profile.name.trim().to_string()
        };

        let metadata = serde_json::to_string(&ParticipantMetadata {
            skill: scenario.skill.clone(),
            scenario_name: scenario.id.clone(),
            scenario: scenario.clone(),
            user_name: participant_name.clone(),
            user_gender: profile.gender.as_str().to_string(),
        })?;

        let token = AccessToken::with_api_key(
            &self.config.api_key,
            self.config.api_secret.expose_secret(),
        )
        .with_identity(&identity)
        .with_name(&participant_name)
        .with_metadata(&metadata)
        .with_grants(VideoGrants {
            room_join: true,
            room: room_name.clone(),
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
            ..Default::default()
        })
        .with_ttl(self.config.token_ttl)
        .to_jwt()?;

        info!(room = %room_name, %identity, scenario = %scenario.id, "Issued room token");
        Ok(ConnectionDetails {
            server_url: self.config.public_url.clone(),
            room_name,
            participant_name,
            participant_token: token,
        })
    }
}
