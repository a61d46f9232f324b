//! Scenario Generation Service
//!
//! Turns a free-text description of a conversation ("negotiate a raise with my
//! boss") and a goal into a playable [`Scenario`] with an LLM-invented persona.
//! Also produces the short coaching follow-up question asked during onboarding,
//! batches of scenarios for a custom skill, and builder drafts.

use crate::llm_client::{CompletionRequest, LLMClient};
use crate::scenario::{
    DEFAULT_BOT_NAME, DEFAULT_VOICE_DESCRIPTION, DEFAULT_VOICE_ID, Gender, Persona, Scenario,
    Voice,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Skill name given to generated scenarios that carry no skill of their own.
pub const CUSTOM_SKILL: &str = "custom";

const OPENING_FALLBACK: &str = "*The scenario begins* Hello.";

const SCENARIO_SYSTEM_PROMPT: &str = r#"You are a scenario generator for conversation practice. Generate a realistic character and scenario based on the user's description.

Return a JSON object with these fields:
- botname: The character's name
- botgender: "male", "female", or "neutral"
- goal: The user's objective (use the provided goal)
- opening: Initial message from the character (can include roleplay in *asterisks*)
- character: Array of 3-5 strings describing personality, background, communication style
- negprompt: Array of 3-5 strings describing how the character resists or challenges the user
- voice_description: Description of voice characteristics for text-to-speech

Be creative and realistic. Make the character challenging but fair."#;

const CUSTOM_SET_SYSTEM_PROMPT: &str =
    "You are an expert roleplay scenario designer. Create high-quality, realistic scenarios.";

const CUSTOM_SET_GUIDELINES: &str = r#"STRUCTURE and CONTENT:
- `description`: Intriguing intro hinting at task complexity with non-trivial details. Must NOT duplicate `goal`
- `goal`: Clearly measurable, specific objective, formulated concisely and engagingly
- `opening`: Sets scene: place, time, roles, initial situation. Includes the character's first line, with actions in *asterisks*
- `character`: Direct directives for the character: personality, goals, speech style
- `negprompt`: Resistance mechanisms and gradual concession triggers based ONLY on dialogue text

RESTRICTIONS:
- No mentions of "bot"/"AI"
- No voice characteristics (tone, speed, intonation) outside `voice_description`

SCENARIO FOCUS:
- Each scenario trains ONE specific aspect of the skill
- All scenarios must cover DIFFERENT aspects and different situations
- Situations must be recognizable and life-like"#;

const DRAFT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant that generates structured roleplay scenarios for communication practice.

Return a JSON object with these fields:
- context: A description of the communication scenario and situation
- persona: The character the user will practice with, an object with
  - name: Name of the person to practice with
  - role: Their role or title
  - traits: Key personality traits
- objections: Array of potential questions or objections that might come up in this conversation"#;

const FOLLOW_UP_SYSTEM_PROMPT: &str = r#"You are an expert communication coach helping users identify their specific needs.

Your task: Generate ONE insightful follow-up question based on what the user wants to practice.

Guidelines:
- Ask about specific situations, contexts, or challenges they face
- Make it relevant and concrete, not generic
- Keep it conversational and friendly
- The question should help clarify what scenarios would be most useful for them
- Aim for 1-2 sentences max

Example:
User: "Negotiation"
Follow-up: "Are you preparing for a specific negotiation, like a salary discussion or business deal, or working on general negotiation skills?"

Return ONLY the follow-up question text, nothing else."#;

/// Defines the contract for any service that can invent practice scenarios.
#[async_trait]
pub trait ScenarioGenerator: Send + Sync {
    /// Generates a full scenario for a user-described situation and goal.
    async fn generate_scenario(&self, description: &str, goal: &str) -> Result<Scenario>;

    /// Generates one follow-up question about what the user wants to practice.
    async fn follow_up_question(&self, user_input: &str) -> Result<String>;

    /// Generates up to `count` distinct scenarios for a skill the catalog does
    /// not cover, in a single request, and names the skill.
    async fn generate_custom_set(
        &self,
        description: &str,
        user_context: &str,
        count: usize,
    ) -> Result<CustomScenarioSet>;

    /// Turns a free-form builder prompt into a scenario outline.
    async fn draft_scenario(&self, prompt: &str) -> Result<ScenarioDraft>;
}

/// Scenarios generated together for one custom skill.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CustomScenarioSet {
    pub skill: String,
    pub scenarios: Vec<Scenario>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DraftPersona {
    pub name: String,
    pub role: String,
    pub traits: String,
}

/// Outline of a scenario produced by the scenario builder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioDraft {
    pub context: String,
    pub persona: DraftPersona,
    pub objections: Vec<String>,
}

/// Reduces a free-form skill label to one lowercase word.
pub fn skill_slug(raw: &str) -> Option<String> {
    let word: String = raw
        .split_whitespace()
        .next()?
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    (!word.is_empty()).then_some(word)
}

/// The question to ask when the follow-up generator is unavailable.
pub fn fallback_follow_up(user_input: &str) -> String {
    format!(
        "Tell me more about what you'd like to practice with {}.",
        user_input.trim()
    )
}

/// Scenario fields as the LLM returns them; anything may be missing.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct GeneratedScenario {
    description: Option<String>,
    goal: Option<String>,
    skill: Option<String>,
    botname: Option<String>,
    botgender: Option<String>,
    opening: Option<String>,
    character: Option<Vec<String>>,
    negprompt: Option<Vec<String>>,
    voice_description: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn non_empty_list(value: Option<Vec<String>>) -> Option<Vec<String>> {
    value.filter(|items| items.iter().any(|s| !s.trim().is_empty()))
}

/// Builds a scenario from the user's request and whatever the LLM produced.
pub(crate) fn assemble_scenario(
    id: String,
    description: &str,
    goal: &str,
    generated: serde_json::Value,
) -> Scenario {
    let generated: GeneratedScenario = serde_json::from_value(generated).unwrap_or_default();
    build_scenario(id, description, goal, generated)
}

fn build_scenario(id: String, description: &str, goal: &str, generated: GeneratedScenario) -> Scenario {
    Scenario {
        id,
        name: description.to_string(),
        description: description.to_string(),
        goal: goal.to_string(),
        opening: non_empty(generated.opening).unwrap_or_else(|| OPENING_FALLBACK.to_string()),
        skill: CUSTOM_SKILL.to_string(),
        persona: Persona {
            botname: non_empty(generated.botname).unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
            botgender: generated
                .botgender
                .as_deref()
                .and_then(|g| g.parse::<Gender>().ok())
                .unwrap_or_default(),
            character: non_empty_list(generated.character)
                .unwrap_or_else(|| vec!["Professional character".to_string()]),
            negprompt: non_empty_list(generated.negprompt)
                .unwrap_or_else(|| vec!["Maintain professional distance".to_string()]),
        },
        voice: Voice {
            voice_description: non_empty(generated.voice_description)
                .unwrap_or_else(|| DEFAULT_VOICE_DESCRIPTION.to_string()),
            elevenlabs_voice_id: DEFAULT_VOICE_ID.to_string(),
        },
    }
}

/// Builds a custom set from a `{"skill": ..., "scenarios": [...]}` answer.
///
/// Each scenario keeps its own description and goal when the LLM gave one;
/// the user's description and context fill the gaps.
pub(crate) fn assemble_custom_set(
    id_prefix: &str,
    description: &str,
    user_context: &str,
    count: usize,
    generated: serde_json::Value,
) -> Result<CustomScenarioSet> {
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Answer {
        skill: Option<String>,
        scenarios: Vec<serde_json::Value>,
    }

    let answer: Answer = serde_json::from_value(generated)?;
    let items: Vec<GeneratedScenario> = answer
        .scenarios
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .take(count)
        .collect();
    if items.is_empty() {
        bail!("No scenarios in the generated set");
    }

    let skill = answer
        .skill
        .as_deref()
        .or_else(|| items.iter().find_map(|item| item.skill.as_deref()))
        .and_then(skill_slug)
        .unwrap_or_else(|| CUSTOM_SKILL.to_string());
    let fallback_goal = if user_context.trim().is_empty() {
        description
    } else {
        user_context
    };

    let scenarios = items
        .into_iter()
        .enumerate()
        .map(|(n, mut item)| {
            let own_description = non_empty(item.description.take());
            let own_goal = non_empty(item.goal.take());
            let mut scenario = build_scenario(
                format!("{}_{}", id_prefix, n + 1),
                own_description.as_deref().unwrap_or(description),
                own_goal.as_deref().unwrap_or(fallback_goal),
                item,
            );
            scenario.skill = skill.clone();
            scenario
        })
        .collect();

    Ok(CustomScenarioSet { skill, scenarios })
}

/// An implementation of `ScenarioGenerator` that uses an `LLMClient`.
pub struct LLMScenarioGenerator {
    llm: Arc<dyn LLMClient>,
    follow_up_model: Option<String>,
}

impl LLMScenarioGenerator {
    /// # Arguments
    ///
    /// * `llm` - Client used for both persona generation and follow-up questions.
    /// * `follow_up_model` - Optional cheaper model for the follow-up question.
    pub fn new(llm: Arc<dyn LLMClient>, follow_up_model: Option<String>) -> Self {
        Self {
            llm,
            follow_up_model,
        }
    }
}

#[async_trait]
impl ScenarioGenerator for LLMScenarioGenerator {
    #[instrument(skip(self))]
    async fn generate_scenario(&self, description: &str, goal: &str) -> Result<Scenario> {
        if description.trim().is_empty() || goal.trim().is_empty() {
            bail!("Missing scenario or goal");
        }

        let request = CompletionRequest::new(
            SCENARIO_SYSTEM_PROMPT,
            format!("Scenario: {}\nGoal: {}", description, goal),
            0.8,
        );
        let generated = self.llm.complete_json(request).await?;
        let id = format!("generated_{}", chrono::Utc::now().timestamp_millis());
        let scenario = assemble_scenario(id, description, goal, generated);
        info!(id = %scenario.id, botname = %scenario.persona.botname, "Generated scenario");
        Ok(scenario)
    }

    async fn follow_up_question(&self, user_input: &str) -> Result<String> {
        if user_input.trim().is_empty() {
            bail!("userInput is required");
        }

        let mut request = CompletionRequest::new(FOLLOW_UP_SYSTEM_PROMPT, user_input, 0.7);
        if let Some(model) = &self.follow_up_model {
            request = request.with_model(model.clone());
        }
        self.llm.complete_text(request).await
    }

    #[instrument(skip(self))]
    async fn generate_custom_set(
        &self,
        description: &str,
        user_context: &str,
        count: usize,
    ) -> Result<CustomScenarioSet> {
        if description.trim().is_empty() {
            bail!("Missing custom skill description");
        }

        let prompt = format!(
            "Create {count} realistic roleplay scenarios for this custom skill:\n\n\
             CUSTOM SKILL: {description}\n\
             USER CONTEXT: {user_context}\n\n\
             GUIDELINES:\n{CUSTOM_SET_GUIDELINES}\n\n\
             Generate {count} diverse scenarios that would help someone practice: {description}\n\n\
             Respond in JSON format:\n\
             {{\"skill\": \"<ONE lowercase word naming the skill, e.g. teaching>\", \
             \"scenarios\": [{{\"description\": \"...\", \"goal\": \"...\", \"opening\": \"...\", \
             \"character\": [\"...\"], \"negprompt\": [\"...\"], \"botname\": \"...\", \
             \"botgender\": \"male\" or \"female\", \"voice_description\": \"...\"}}]}}"
        );
        let generated = self
            .llm
            .complete_json(CompletionRequest::new(CUSTOM_SET_SYSTEM_PROMPT, prompt, 0.8))
            .await?;
        let prefix = format!("generated_{}", chrono::Utc::now().timestamp_millis());
        let set = assemble_custom_set(&prefix, description, user_context, count, generated)?;
        info!(skill = %set.skill, count = set.scenarios.len(), "Generated custom scenarios");
        Ok(set)
    }

    #[instrument(skip(self))]
    async fn draft_scenario(&self, prompt: &str) -> Result<ScenarioDraft> {
        if prompt.trim().is_empty() {
            bail!("Prompt is required");
        }

        let mut request = CompletionRequest::new(DRAFT_SYSTEM_PROMPT, prompt, 0.7);
        if let Some(model) = &self.follow_up_model {
            request = request.with_model(model.clone());
        }
        let draft: ScenarioDraft = serde_json::from_value(self.llm.complete_json(request).await?)?;
        if draft.context.trim().is_empty() {
            bail!("Generated draft has no context");
        }
        Ok(draft)
    }
}

/// A mock `ScenarioGenerator` for development and integration testing.
///
/// Produces a deterministic scenario without calling any external service.
pub struct MockScenarioGenerator;

#[async_trait]
impl ScenarioGenerator for MockScenarioGenerator {
    async fn generate_scenario(&self, description: &str, goal: &str) -> Result<Scenario> {
        if description.trim().is_empty() || goal.trim().is_empty() {
            bail!("Missing scenario or goal");
        }
        Ok(assemble_scenario(
            "generated_mock".to_string(),
            description,
            goal,
            serde_json::json!({
                "botname": "Alex",
                "opening": "*looks up from the laptop* Oh, hi. What do you need?",
            }),
        ))
    }

    async fn follow_up_question(&self, user_input: &str) -> Result<String> {
        Ok(fallback_follow_up(user_input))
    }

    async fn generate_custom_set(
        &self,
        description: &str,
        user_context: &str,
        count: usize,
    ) -> Result<CustomScenarioSet> {
        let scenarios = (1..=count)
            .map(|n| {
                serde_json::json!({
                    "goal": format!("{} (part {})", user_context.trim(), n),
                    "botname": "Alex",
                    "opening": "*looks up from the laptop* Oh, hi. What do you need?",
                })
            })
            .collect::<Vec<_>>();
        assemble_custom_set(
            "generated_mock",
            description,
            user_context,
            count,
            serde_json::json!({ "skill": description, "scenarios": scenarios }),
        )
    }

    async fn draft_scenario(&self, prompt: &str) -> Result<ScenarioDraft> {
        if prompt.trim().is_empty() {
            bail!("Prompt is required");
        }
        Ok(ScenarioDraft {
            context: prompt.trim().to_string(),
            persona: DraftPersona {
                name: "Alex".to_string(),
                role: "Counterpart".to_string(),
                traits: "Direct, busy".to_string(),
            },
            objections: vec!["Why should I make time for this?".to_string()],
        })
    }
}
