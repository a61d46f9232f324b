//! Main Entrypoint for the Kiyomi API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the scenario catalog.
//! 3. Initializing the optional LLM and LiveKit services.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use kiyomi_api::{config::Config, router::create_router, state::AppState, voice::VoiceTokenService};
use kiyomi_core::{
    FileScenarioStore, LLMClient, LLMScenarioGenerator, OpenAICompatibleClient, ScenarioGenerator,
    ScenarioSelector, ScenarioStore,
};
use secrecy::ExposeSecret;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Open the Scenario Catalog ---
    let catalog: Arc<dyn ScenarioStore> = Arc::new(FileScenarioStore::new(&config.scenarios_path));
    match catalog.list_skills().await {
        Ok(skills) => info!(skills = skills.len(), path = %config.scenarios_path.display(), "Scenario catalog loaded"),
        Err(e) => warn!(error = %e, path = %config.scenarios_path.display(), "Scenario catalog is not available"),
    }

    let mut app_state = AppState::new(Arc::clone(&catalog));

    // --- 4. Initialize Optional Services ---
    match &config.llm_api_key {
        Some(api_key) => {
            info!(provider = ?config.provider, "Scenario generation enabled.");
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key.expose_secret())
                .with_api_base(config.provider.api_base());
            let llm: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
            ));
            let generator: Arc<dyn ScenarioGenerator> = Arc::new(LLMScenarioGenerator::new(
                Arc::clone(&llm),
                Some(config.followup_model.clone()),
            ));
            app_state.selector = Some(Arc::new(ScenarioSelector::new(
                llm,
                Arc::clone(&catalog),
                Arc::clone(&generator),
            )));
            app_state.generator = Some(generator);
        }
        None => warn!(provider = ?config.provider, "No LLM API key; generation routes will answer 503"),
    }

    match &config.livekit {
        Some(livekit) => {
            info!(url = %livekit.url, public_url = %livekit.public_url, "LiveKit room tokens enabled.");
            app_state.voice = Some(Arc::new(VoiceTokenService::new(livekit.clone())));
        }
        None => warn!("LiveKit is not configured; connection details will answer 503"),
    }

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(Arc::new(app_state)).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
