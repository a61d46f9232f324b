//! Typed records for everything the practice agent pushes back during and after a call.
//!
//! Payloads arrive as free-form JSON strings over the realtime control channel.
//! Each record has a `parse` constructor that either yields a complete value or a
//! [`ParseError`]; a half-filled record is never produced.

use serde::{Deserialize, Deserializer, Serialize};

/// Upper bound of every score scale used by the agent.
pub const MAX_SCORE: f32 = 10.0;

/// A payload could not be turned into a typed record.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Required field is empty: {0}")]
    MissingField(&'static str),
    #[error("Score for {field} out of range: {value}")]
    ScoreOutOfRange { field: &'static str, value: f32 },
}

fn check_score(field: &'static str, value: f32) -> Result<(), ParseError> {
    if value.is_finite() && (0.0..=MAX_SCORE).contains(&value) {
        Ok(())
    } else {
        Err(ParseError::ScoreOutOfRange { field, value })
    }
}

// --- Goal progress ---

/// Snapshot of how close the user is to the scenario goal, pushed after each agent turn.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GoalProgress {
    pub is_goal_complete: bool,
    pub progress_towards_goal: f32,
    #[serde(default)]
    pub previous_progress_towards_goal: Option<f32>,
    #[serde(default)]
    pub is_bad_ending_triggered: bool,
    /// Call-to-action text to flash at the user.
    #[serde(rename = "CTA", default)]
    pub cta: Option<String>,
}

impl GoalProgress {
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let progress: GoalProgress = serde_json::from_str(payload)?;
        check_score("progress_towards_goal", progress.progress_towards_goal)?;
        if let Some(previous) = progress.previous_progress_towards_goal {
            check_score("previous_progress_towards_goal", previous)?;
        }
        Ok(progress)
    }

    /// Replaces the previous value with the score the user last saw, if any.
    pub fn following(mut self, prior: Option<&GoalProgress>) -> Self {
        if let Some(prior) = prior {
            self.previous_progress_towards_goal = Some(prior.progress_towards_goal);
        }
        self
    }

    /// Whether the score went up since the previous snapshot.
    pub fn improved(&self) -> bool {
        match self.previous_progress_towards_goal {
            Some(previous) => self.progress_towards_goal > previous,
            None => false,
        }
    }

    /// The CTA text, if present and not blank.
    pub fn call_to_action(&self) -> Option<&str> {
        self.cta.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

// --- Hints ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HintRecord {
    pub hint: String,
    pub category: String,
}

impl HintRecord {
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let record: HintRecord = serde_json::from_str(payload)?;
        if record.hint.trim().is_empty() {
            return Err(ParseError::MissingField("hint"));
        }
        Ok(record)
    }
}

// --- Post-call analysis ---

/// Score and commentary for one skill dimension.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DimensionScore {
    pub score: f32,
    pub insight: String,
}

/// The five fixed dimensions of the post-call radar chart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RadarDiagram {
    pub impact: DimensionScore,
    pub rapport: DimensionScore,
    pub flex: DimensionScore,
    pub frame: DimensionScore,
    pub timing: DimensionScore,
}

impl RadarDiagram {
    /// Dimensions in display order (clockwise from the top of the chart).
    pub fn dimensions(&self) -> [(&'static str, &DimensionScore); 5] {
        [
            ("impact", &self.impact),
            ("rapport", &self.rapport),
            ("flex", &self.flex),
            ("timing", &self.timing),
            ("frame", &self.frame),
        ]
    }
}

/// Structured post-call report. Produced at most once per session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Letter grade from `E-` to `A+`, kept as sent.
    #[serde(rename = "complete_score", deserialize_with = "grade_or_number")]
    pub overall_score: String,
    pub radar_diagram: RadarDiagram,
    #[serde(default)]
    pub feedback: Vec<String>,
    pub overall_message: String,
}

impl AnalysisResult {
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let result: AnalysisResult = serde_json::from_str(payload)?;
        if result.overall_score.is_empty() {
            return Err(ParseError::MissingField("complete_score"));
        }
        for (name, dimension) in result.radar_diagram.dimensions() {
            check_score(name, dimension.score)?;
        }
        Ok(result)
    }

    /// The grade letter without its `+`/`-` modifier.
    pub fn grade_letter(&self) -> Option<char> {
        self.overall_score
            .chars()
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase())
    }
}

/// Grades arrive as `"C+"`; older agents sent a bare number.
fn grade_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.trim().to_string(),
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis_json(score: &str) -> String {
        format!(
            r#"{{
                "complete_score": {score},
                "radar_diagram": {{
                    "impact": {{"score": 7, "insight": "Clear ask"}},
                    "rapport": {{"score": 6, "insight": "Warm"}},
                    "flex": {{"score": 5, "insight": "Rigid at times"}},
                    "frame": {{"score": 8, "insight": "Held the frame"}},
                    "timing": {{"score": 4, "insight": "Rushed the close"}}
                }},
                "feedback": ["Pause before answering", "Name a number first"],
                "overall_message": "Solid first attempt"
            }}"#
        )
    }

    #[test]
    fn test_goal_progress_parse() {
        let payload = r#"{
            "is_goal_complete": false,
            "progress_towards_goal": 6.5,
            "previous_progress_towards_goal": 5,
            "is_bad_ending_triggered": false,
            "CTA": "Ask for a number!"
        }"#;
        let progress = GoalProgress::parse(payload).unwrap();
        assert_eq!(progress.progress_towards_goal, 6.5);
        assert_eq!(progress.call_to_action(), Some("Ask for a number!"));
        assert!(progress.improved());
    }

    #[test]
    fn test_goal_progress_decrease_is_not_improvement() {
        let first = GoalProgress::parse(r#"{"is_goal_complete": false, "progress_towards_goal": 7}"#)
            .unwrap();
        let second = GoalProgress::parse(r#"{"is_goal_complete": false, "progress_towards_goal": 4}"#)
            .unwrap()
            .following(Some(&first));

        assert_eq!(second.previous_progress_towards_goal, Some(7.0));
        assert_eq!(second.progress_towards_goal, 4.0);
        assert!(!second.improved());
    }

    #[test]
    fn test_goal_progress_rejects_out_of_range() {
        let err = GoalProgress::parse(r#"{"is_goal_complete": false, "progress_towards_goal": 11}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::ScoreOutOfRange { field: "progress_towards_goal", .. }));
    }

    #[test]
    fn test_goal_progress_blank_cta_is_none() {
        let progress = GoalProgress::parse(
            r#"{"is_goal_complete": true, "progress_towards_goal": 10, "CTA": "  "}"#,
        )
        .unwrap();
        assert_eq!(progress.call_to_action(), None);
        assert!(!progress.improved());
    }

    #[test]
    fn test_hint_parse() {
        let hint = HintRecord::parse(r#"{"hint": "Mirror their last words", "category": "Rapport"}"#)
            .unwrap();
        assert_eq!(hint.category, "Rapport");

        assert!(HintRecord::parse(r#"{"hint": "", "category": "x"}"#).is_err());
        assert!(HintRecord::parse("not json").is_err());
    }

    #[test]
    fn test_analysis_accepts_letter_grade() {
        let result = AnalysisResult::parse(&analysis_json(r#""C+""#)).unwrap();
        assert_eq!(result.overall_score, "C+");
        assert_eq!(result.grade_letter(), Some('C'));
        assert_eq!(result.feedback.len(), 2);
        assert_eq!(result.radar_diagram.timing.score, 4.0);

        let result = AnalysisResult::parse(&analysis_json(r#"" e- ""#)).unwrap();
        assert_eq!(result.overall_score, "e-");
        assert_eq!(result.grade_letter(), Some('E'));
    }

    #[test]
    fn test_analysis_keeps_numeric_score() {
        let result = AnalysisResult::parse(&analysis_json("8")).unwrap();
        assert_eq!(result.overall_score, "8");
        assert_eq!(result.grade_letter(), None);
    }

    #[test]
    fn test_analysis_rejects_partial_payload() {
        let err = AnalysisResult::parse(r#"{"complete_score": "B", "overall_message": "ok"}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));

        let err = AnalysisResult::parse(&analysis_json(r#""  ""#)).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("complete_score")));
    }

    #[test]
    fn test_analysis_rejects_radar_score_out_of_range() {
        let payload = analysis_json(r#""A""#).replace(r#""score": 7"#, r#""score": 12"#);
        let err = AnalysisResult::parse(&payload).unwrap_err();
        assert!(matches!(err, ParseError::ScoreOutOfRange { field: "impact", .. }));
    }

    #[test]
    fn test_radar_dimension_order() {
        let result = AnalysisResult::parse(&analysis_json(r#""D""#)).unwrap();
        let names: Vec<_> = result
            .radar_diagram
            .dimensions()
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names, vec!["impact", "rapport", "flex", "timing", "frame"]);
    }
}
