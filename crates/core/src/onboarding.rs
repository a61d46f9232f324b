//! Onboarding Scenario Selection
//!
//! After a short onboarding chat, decide what the user should practice: either a
//! handful of scenarios from an existing skill, or freshly generated ones when the
//! need matches no skill in the catalog.

use crate::catalog::{CatalogError, ScenarioStore};
use crate::generator::ScenarioGenerator;
use crate::llm_client::{CompletionRequest, LLMClient};
use crate::scenario::Scenario;
use anyhow::Result;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// How many scenarios a selection offers.
pub const SELECTION_SIZE: usize = 3;
/// Only the tail of the chat is sent to the classifier.
const CHAT_CONTEXT_TURNS: usize = 10;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// The classifier's reading of the onboarding chat.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SkillAnalysis {
    pub skill: String,
    pub is_custom: bool,
    pub custom_description: String,
    pub user_context: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioSelection {
    pub skill: String,
    pub scenarios: Vec<Scenario>,
    pub is_custom: bool,
}

pub struct ScenarioSelector {
    llm: Arc<dyn LLMClient>,
    catalog: Arc<dyn ScenarioStore>,
    generator: Arc<dyn ScenarioGenerator>,
}

impl ScenarioSelector {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        catalog: Arc<dyn ScenarioStore>,
        generator: Arc<dyn ScenarioGenerator>,
    ) -> Self {
        Self {
            llm,
            catalog,
            generator,
        }
    }

    /// Selects or generates scenarios for the chat. LLM failures degrade to a
    /// random pick from the catalog; only a missing catalog is an error.
    pub async fn select(&self, chat_history: &[ChatTurn]) -> Result<ScenarioSelection, CatalogError> {
        let skill_names: Vec<String> = self
            .catalog
            .list_skills()
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();

        match self.select_with_llm(chat_history, &skill_names).await {
            Ok(selection) if !selection.scenarios.is_empty() => Ok(selection),
            Ok(_) => {
                warn!("Selection came back empty; falling back to a random skill");
                self.random_selection(&skill_names).await
            }
            Err(e) => {
                warn!(error = %e, "Scenario selection failed; falling back to a random skill");
                self.random_selection(&skill_names).await
            }
        }
    }

    async fn select_with_llm(
        &self,
        chat_history: &[ChatTurn],
        skill_names: &[String],
    ) -> Result<ScenarioSelection> {
        let analysis = self.analyze(chat_history, skill_names).await?;
        info!(skill = %analysis.skill, is_custom = analysis.is_custom, "Onboarding chat classified");

        let known = skill_names.iter().any(|s| *s == analysis.skill);
        if analysis.is_custom || !known {
            let description = if analysis.custom_description.trim().is_empty() {
                analysis.user_context.clone()
            } else {
                analysis.custom_description.clone()
            };
            let set = self
                .generator
                .generate_custom_set(&description, &analysis.user_context, SELECTION_SIZE)
                .await?;
            return Ok(ScenarioSelection {
                skill: set.skill,
                scenarios: set.scenarios,
                is_custom: true,
            });
        }

        let scenarios = self
            .catalog
            .random_scenarios(&analysis.skill, SELECTION_SIZE)
            .await?;
        Ok(ScenarioSelection {
            skill: analysis.skill,
            scenarios,
            is_custom: false,
        })
    }

    async fn analyze(&self, chat_history: &[ChatTurn], skill_names: &[String]) -> Result<SkillAnalysis> {
        let start = chat_history.len().saturating_sub(CHAT_CONTEXT_TURNS);
        let chat_context = chat_history[start..]
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Analyze this onboarding chat and determine which skill the user needs.\n\n\
             EXISTING SKILLS:\n{}\n\nCHAT HISTORY:\n{}\n\n\
             TASK:\n\
             1. If the user's need matches one of the EXISTING SKILLS (even approximately), return that skill name\n\
             2. If it's completely different, return \"custom\"\n\
             3. Extract key context about what the user wants to practice\n\n\
             Respond in JSON format:\n\
             {{\"skill\": \"<skill or custom>\", \"is_custom\": true/false, \
             \"custom_description\": \"brief description if custom\", \
             \"user_context\": \"what user wants to practice\"}}",
            skill_names.join(", "),
            chat_context
        );

        let value = self
            .llm
            .complete_json(CompletionRequest::new(
                "You are a skill classification assistant. Always respond with valid JSON.",
                prompt,
                0.3,
            ))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn random_selection(&self, skill_names: &[String]) -> Result<ScenarioSelection, CatalogError> {
        pick_random(self.catalog.as_ref(), skill_names).await
    }
}

/// Picks a random skill and a few of its scenarios without consulting an LLM.
pub async fn random_selection(catalog: &dyn ScenarioStore) -> Result<ScenarioSelection, CatalogError> {
    let skill_names: Vec<String> = catalog
        .list_skills()
        .await?
        .into_iter()
        .map(|s| s.name)
        .collect();
    pick_random(catalog, &skill_names).await
}

async fn pick_random(
    catalog: &dyn ScenarioStore,
    skill_names: &[String],
) -> Result<ScenarioSelection, CatalogError> {
    let skill = skill_names
        .choose(&mut rand::rng())
        .cloned()
        .ok_or_else(|| CatalogError::NotFound("No skills available".to_string()))?;
    let scenarios = catalog.random_scenarios(&skill, SELECTION_SIZE).await?;
    Ok(ScenarioSelection {
        skill,
        scenarios,
        is_custom: false,
    })
}
