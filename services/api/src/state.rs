//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the scenario catalog
//! and the optional generation and room-token services.

use crate::voice::VoiceTokenService;
use kiyomi_core::{ScenarioGenerator, ScenarioSelector, ScenarioStore};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
///
/// The LLM-backed services and the LiveKit token service are optional; the
/// routes that need them answer 503 when they are absent.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn ScenarioStore>,
    pub generator: Option<Arc<dyn ScenarioGenerator>>,
    pub selector: Option<Arc<ScenarioSelector>>,
    pub voice: Option<Arc<VoiceTokenService>>,
}

impl AppState {
    /// A state that serves the catalog only.
    pub fn new(catalog: Arc<dyn ScenarioStore>) -> Self {
        Self {
            catalog,
            generator: None,
            selector: None,
            voice: None,
        }
    }
}
