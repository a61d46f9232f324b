//! Scenario and Skill records
//!
//! A scenario is one practice situation: the persona the user talks to, the goal
//! they are trying to reach, and the line the persona opens with. Scenarios are
//! grouped into skills (e.g. "negotiation", "smalltalk").

use crate::feedback::ParseError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Voice used when a scenario does not name one.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
/// Persona name used when a scenario does not name one.
pub const DEFAULT_BOT_NAME: &str = "Practice Partner";
pub const DEFAULT_VOICE_DESCRIPTION: &str = "Clear professional voice";

static STAGE_DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*[^*]+\*").expect("stage direction pattern is valid"));

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    #[serde(other)]
    Neutral,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Neutral => "neutral",
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            _ => Gender::Neutral,
        })
    }
}

fn default_bot_name() -> String {
    DEFAULT_BOT_NAME.to_string()
}

fn default_voice_id() -> String {
    DEFAULT_VOICE_ID.to_string()
}

fn default_voice_description() -> String {
    DEFAULT_VOICE_DESCRIPTION.to_string()
}

/// Who the user is talking to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Persona {
    #[serde(default = "default_bot_name")]
    pub botname: String,
    #[serde(default)]
    pub botgender: Gender,
    /// Personality, background and communication style.
    #[serde(default)]
    pub character: Vec<String>,
    /// How the persona resists or challenges the user.
    #[serde(default)]
    pub negprompt: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            botname: default_bot_name(),
            botgender: Gender::Neutral,
            character: Vec::new(),
            negprompt: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Voice {
    #[serde(default = "default_voice_description")]
    pub voice_description: String,
    #[serde(default = "default_voice_id")]
    pub elevenlabs_voice_id: String,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            voice_description: default_voice_description(),
            elevenlabs_voice_id: default_voice_id(),
        }
    }
}

/// A single practice scenario. Immutable once loaded.
///
/// The JSON shape is flat (persona and voice fields sit next to `goal` and
/// `opening`), matching the catalog files and the generation endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scenario {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub goal: String,
    /// The persona's first line; may embed one `*...*` stage direction.
    pub opening: String,
    #[serde(default)]
    pub skill: String,
    #[serde(flatten)]
    pub persona: Persona,
    #[serde(flatten)]
    pub voice: Voice,
}

impl Scenario {
    /// Parses a scenario from JSON and checks that it is playable.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let scenario: Scenario = serde_json::from_str(payload)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// A scenario needs a goal and an opening line to be played.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.goal.trim().is_empty() {
            return Err(ParseError::MissingField("goal"));
        }
        if self.opening.trim().is_empty() {
            return Err(ParseError::MissingField("opening"));
        }
        Ok(())
    }

    /// Splits the opening into its stage direction and the spoken script.
    pub fn split_opening(&self) -> (String, String) {
        split_opening(&self.opening)
    }
}

/// A named group of scenarios, in load order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub scenarios: Vec<Scenario>,
}

impl Skill {
    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }
}

/// Separates the first `*...*` segment of an opening line from the rest.
///
/// Returns `(stage_direction, script)`. The stage direction keeps its asterisks;
/// the script is the opening with that segment removed, trimmed. Without a
/// stage direction the result is `("", opening.trim())`.
pub fn split_opening(text: &str) -> (String, String) {
    match STAGE_DIRECTION.find(text) {
        Some(m) => {
            let stage = m.as_str().to_string();
            let script = text.replacen(&stage, "", 1).trim().to_string();
            (stage, script)
        }
        None => (String::new(), text.trim().to_string()),
    }
}
