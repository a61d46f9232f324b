//! API Models
//!
//! Request and response bodies of the HTTP API, annotated for OpenAPI
//! documentation with `utoipa`. Domain records from `kiyomi-core` are embedded
//! as opaque objects in the schema.

use kiyomi_core::{ChatTurn, ConnectionDetails, Scenario, ScenarioDraft, ScenarioSelection, Skill};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, ToSchema)]
pub struct SkillsResponse {
    #[schema(value_type = Vec<Object>)]
    pub skills: Vec<Skill>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ScenarioDetailQuery {
    /// Skill name, the catalog file stem.
    #[param(example = "negotiation")]
    pub skill: Option<String>,
    /// Scenario id within the skill.
    #[param(example = "raise")]
    pub id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct GenerateScenarioPayload {
    /// Free-text description of the conversation to practice.
    #[schema(example = "Asking my landlord to fix the heating")]
    pub scenario: Option<String>,
    #[schema(example = "Get a repair date this week")]
    pub goal: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct GenerateScenarioResponse {
    #[serde(rename = "scenarioData")]
    #[schema(value_type = Object)]
    pub scenario_data: Scenario,
}

#[derive(Deserialize, ToSchema)]
pub struct FollowUpPayload {
    #[serde(rename = "userInput")]
    #[schema(example = "Negotiation")]
    pub user_input: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct FollowUpResponse {
    pub question: String,
}

#[derive(Deserialize, ToSchema)]
pub struct BuilderChatPayload {
    #[schema(example = "I want to pitch a budget increase to a skeptical CFO")]
    pub prompt: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct BuilderPersona {
    pub name: String,
    pub role: String,
    pub traits: String,
}

/// A scenario outline the builder can refine before generating the full scenario.
#[derive(Serialize, ToSchema, Debug)]
pub struct BuilderChatResponse {
    /// The communication scenario and situation.
    pub context: String,
    pub persona: BuilderPersona,
    /// Questions or objections likely to come up.
    pub objections: Vec<String>,
}

impl From<ScenarioDraft> for BuilderChatResponse {
    fn from(draft: ScenarioDraft) -> Self {
        Self {
            context: draft.context,
            persona: BuilderPersona {
                name: draft.persona.name,
                role: draft.persona.role,
                traits: draft.persona.traits,
            },
            objections: draft.objections,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SelectScenariosPayload {
    /// The onboarding chat, oldest turn first.
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub chat_history: Vec<ChatTurn>,
}

#[derive(Serialize, ToSchema)]
pub struct SelectScenariosResponse {
    pub skill: String,
    #[schema(value_type = Vec<Object>)]
    pub scenarios: Vec<Scenario>,
    pub is_custom: bool,
}

impl From<ScenarioSelection> for SelectScenariosResponse {
    fn from(selection: ScenarioSelection) -> Self {
        Self {
            skill: selection.skill,
            scenarios: selection.scenarios,
            is_custom: selection.is_custom,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConnectionDetailsQuery {
    /// The scenario to play, as JSON.
    #[serde(rename = "scenarioData")]
    pub scenario_data: Option<String>,
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    /// `male`, `female` or `neutral`.
    #[serde(rename = "userGender")]
    pub user_gender: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetailsResponse {
    #[schema(example = "wss://rooms.example.com")]
    pub server_url: String,
    #[schema(example = "practice_3f2a9c")]
    pub room_name: String,
    pub participant_name: String,
    pub participant_token: String,
}

impl From<ConnectionDetails> for ConnectionDetailsResponse {
    fn from(details: ConnectionDetails) -> Self {
        Self {
            server_url: details.server_url,
            room_name: details.room_name,
            participant_name: details.participant_name,
            participant_token: details.participant_token,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
