//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and the OpenAPI documentation.

use crate::{
    handlers,
    models::{
        BuilderChatPayload, BuilderChatResponse, BuilderPersona, ConnectionDetailsResponse,
        ErrorResponse, FollowUpPayload, FollowUpResponse,
        GenerateScenarioPayload, GenerateScenarioResponse, SelectScenariosPayload,
        SelectScenariosResponse, SkillsResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_scenarios,
        handlers::scenario_detail,
        handlers::generate_scenario,
        handlers::generate_followup,
        handlers::builder_chat,
        handlers::select_scenarios,
        handlers::connection_details,
    ),
    components(
        schemas(
            SkillsResponse,
            GenerateScenarioPayload,
            GenerateScenarioResponse,
            FollowUpPayload,
            FollowUpResponse,
            BuilderChatPayload,
            BuilderChatResponse,
            BuilderPersona,
            SelectScenariosPayload,
            SelectScenariosResponse,
            ConnectionDetailsResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Kiyomi API", description = "Scenario catalog, generation and practice room credentials")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/api/scenarios", get(handlers::list_scenarios))
        .route("/api/scenario-detail", get(handlers::scenario_detail))
        .route("/api/generate-scenario", post(handlers::generate_scenario))
        .route("/api/generate-followup", post(handlers::generate_followup))
        .route("/api/builder-chat", post(handlers::builder_chat))
        .route("/api/select-scenarios", post(handlers::select_scenarios))
        .route("/api/connection-details", get(handlers::connection_details))
        .with_state(app_state);

    // Swagger UI is stateless and merged alongside the API routes.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
