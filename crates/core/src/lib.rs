//! Kiyomi core domain: practice scenarios, the feedback records pushed by the
//! practice agent, the scenario catalog, and LLM-backed scenario generation.

pub mod catalog;
pub mod feedback;
pub mod generator;
pub mod llm_client;
pub mod onboarding;
pub mod profile;
pub mod scenario;

pub use catalog::{CatalogError, FileScenarioStore, ScenarioStore};
pub use feedback::{AnalysisResult, DimensionScore, GoalProgress, HintRecord, ParseError, RadarDiagram};
pub use generator::{
    CUSTOM_SKILL, CustomScenarioSet, DraftPersona, LLMScenarioGenerator, ScenarioDraft,
    ScenarioGenerator, fallback_follow_up,
};
pub use llm_client::{CompletionRequest, LLMClient, OpenAICompatibleClient};
pub use onboarding::{ChatTurn, ScenarioSelection, ScenarioSelector, random_selection};
pub use profile::{ConnectionDetails, UserProfile};
pub use scenario::{Gender, Persona, Scenario, Skill, Voice, split_opening};
