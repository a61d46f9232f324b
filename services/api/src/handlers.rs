//! Axum Handlers for the REST API
//!
//! Catalog browsing, scenario generation, onboarding selection and room
//! credentials. It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use kiyomi_core::{
    CatalogError, Gender, Scenario, UserProfile, fallback_follow_up, random_selection,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{
        BuilderChatPayload, BuilderChatResponse, ConnectionDetailsQuery,
        ConnectionDetailsResponse, ErrorResponse, FollowUpPayload,
        FollowUpResponse, GenerateScenarioPayload, GenerateScenarioResponse, ScenarioDetailQuery,
        SelectScenariosPayload, SelectScenariosResponse, SkillsResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn catalog_error(err: CatalogError) -> ApiError {
    match err {
        CatalogError::NotFound(message) => ApiError::NotFound(message),
        other => ApiError::InternalServerError(other.into()),
    }
}

/// `Some` only for a present, non-blank value.
fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// List every skill with its playable scenarios.
#[utoipa::path(
    get,
    path = "/api/scenarios",
    responses(
        (status = 200, description = "The scenario catalog", body = SkillsResponse),
        (status = 404, description = "No scenarios available", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_scenarios(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SkillsResponse>, ApiError> {
    let skills = state.catalog.list_skills().await.map_err(catalog_error)?;
    Ok(Json(SkillsResponse { skills }))
}

/// Get one scenario by skill and id.
#[utoipa::path(
    get,
    path = "/api/scenario-detail",
    params(ScenarioDetailQuery),
    responses(
        (status = 200, description = "Scenario details"),
        (status = 400, description = "Missing parameter", body = ErrorResponse),
        (status = 404, description = "Scenario not found", body = ErrorResponse)
    )
)]
pub async fn scenario_detail(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScenarioDetailQuery>,
) -> Result<Json<Scenario>, ApiError> {
    let (Some(skill), Some(id)) = (required(query.skill), required(query.id)) else {
        return Err(ApiError::BadRequest(
            "Missing skill or scenario id parameters".to_string(),
        ));
    };
    let scenario = state
        .catalog
        .get_scenario(&skill, &id)
        .await
        .map_err(catalog_error)?;
    Ok(Json(scenario))
}

/// Invent a scenario for a free-text situation and goal.
#[utoipa::path(
    post,
    path = "/api/generate-scenario",
    request_body = GenerateScenarioPayload,
    responses(
        (status = 200, description = "Scenario generated", body = GenerateScenarioResponse),
        (status = 400, description = "Missing scenario or goal", body = ErrorResponse),
        (status = 503, description = "No LLM configured", body = ErrorResponse),
        (status = 500, description = "Generation failed", body = ErrorResponse)
    )
)]
pub async fn generate_scenario(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateScenarioPayload>,
) -> Result<Json<GenerateScenarioResponse>, ApiError> {
    let (Some(description), Some(goal)) = (required(payload.scenario), required(payload.goal))
    else {
        return Err(ApiError::BadRequest("Missing scenario or goal".to_string()));
    };
    let generator = state.generator.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Scenario generation is not configured".to_string())
    })?;

    let scenario = generator.generate_scenario(&description, &goal).await?;
    info!(id = %scenario.id, "Generated custom scenario");
    Ok(Json(GenerateScenarioResponse {
        scenario_data: scenario,
    }))
}

/// Ask one coaching question about what the user wants to practice.
#[utoipa::path(
    post,
    path = "/api/generate-followup",
    request_body = FollowUpPayload,
    responses(
        (status = 200, description = "Follow-up question", body = FollowUpResponse),
        (status = 400, description = "Missing userInput", body = ErrorResponse),
        (status = 503, description = "No LLM configured", body = ErrorResponse)
    )
)]
pub async fn generate_followup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<FollowUpPayload>,
) -> Result<Json<FollowUpResponse>, ApiError> {
    let user_input = required(payload.user_input)
        .ok_or_else(|| ApiError::BadRequest("userInput is required".to_string()))?;
    let generator = state.generator.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Follow-up generation is not configured".to_string())
    })?;

    let question = match generator.follow_up_question(&user_input).await {
        Ok(question) => question,
        Err(e) => {
            warn!(error = %e, "Follow-up generation failed; using the fallback question");
            fallback_follow_up(&user_input)
        }
    };
    Ok(Json(FollowUpResponse { question }))
}

/// Draft a scenario outline from a free-form builder prompt.
#[utoipa::path(
    post,
    path = "/api/builder-chat",
    request_body = BuilderChatPayload,
    responses(
        (status = 200, description = "Scenario outline", body = BuilderChatResponse),
        (status = 400, description = "Missing prompt", body = ErrorResponse),
        (status = 503, description = "No LLM configured", body = ErrorResponse),
        (status = 500, description = "Drafting failed", body = ErrorResponse)
    )
)]
pub async fn builder_chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BuilderChatPayload>,
) -> Result<Json<BuilderChatResponse>, ApiError> {
    let prompt = required(payload.prompt)
        .ok_or_else(|| ApiError::BadRequest("Prompt is required".to_string()))?;
    let generator = state.generator.as_ref().ok_or_else(|| {
        ApiError::ServiceUnavailable("Scenario builder is not configured".to_string())
    })?;

    let draft = generator.draft_scenario(&prompt).await?;
    info!(persona = %draft.persona.name, objections = draft.objections.len(), "Drafted scenario");
    Ok(Json(draft.into()))
}

/// Pick scenarios for the user from an onboarding chat.
#[utoipa::path(
    post,
    path = "/api/select-scenarios",
    request_body = SelectScenariosPayload,
    responses(
        (status = 200, description = "Selected scenarios", body = SelectScenariosResponse),
        (status = 404, description = "No scenarios available", body = ErrorResponse)
    )
)]
pub async fn select_scenarios(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SelectScenariosPayload>,
) -> Result<Json<SelectScenariosResponse>, ApiError> {
    let selection = match &state.selector {
        Some(selector) => selector.select(&payload.chat_history).await,
        None => random_selection(state.catalog.as_ref()).await,
    }
    .map_err(catalog_error)?;
    info!(skill = %selection.skill, is_custom = selection.is_custom, "Scenarios selected");
    Ok(Json(selection.into()))
}

/// Create a practice room and a token to join it.
#[utoipa::path(
    get,
    path = "/api/connection-details",
    params(ConnectionDetailsQuery),
    responses(
        (status = 200, description = "Room credentials", body = ConnectionDetailsResponse),
        (status = 400, description = "Missing or invalid scenarioData", body = ErrorResponse),
        (status = 503, description = "LiveKit is not configured", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn connection_details(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectionDetailsQuery>,
) -> Result<Json<ConnectionDetailsResponse>, ApiError> {
    let scenario_data = required(query.scenario_data)
        .ok_or_else(|| ApiError::BadRequest("scenarioData is required".to_string()))?;
    let scenario = Scenario::parse(&scenario_data)
        .map_err(|e| ApiError::BadRequest(format!("Invalid scenarioData: {}", e)))?;
    let gender = query
        .user_gender
        .as_deref()
        .and_then(|g| g.parse::<Gender>().ok())
        .unwrap_or_default();
    let profile = UserProfile::new(query.user_name.unwrap_or_default(), gender);

    let voice = state
        .voice
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("LiveKit is not configured".to_string()))?;
    let details = voice.issue(&scenario, &profile)?;
    Ok(Json(details.into()))
}
