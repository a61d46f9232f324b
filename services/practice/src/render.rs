//! Terminal rendering of screens and call events.

use kiyomi_core::{AnalysisResult, Skill};
use kiyomi_session::{Screen, SessionEvent, TranscriptSource};
use std::fmt::Write;

pub fn skills(skills: &[Skill]) -> String {
    let mut out = String::new();
    for skill in skills {
        let _ = writeln!(out, "{}", skill.name);
        for scenario in &skill.scenarios {
            let _ = writeln!(out, "  {:<20} {}", scenario.id, scenario.name);
        }
    }
    out
}

pub fn screen(screen: &Screen) -> String {
    match screen {
        Screen::Setup => "== Setup ==".to_string(),
        Screen::RoleplayIntro { stage_direction } => format!("== Roleplay ==\n{}", stage_direction),
        Screen::Live => "== Live == (h: hint, q: leave)".to_string(),
        Screen::AnalysisPreparing {
            attempt,
            max_attempts,
        } => format!("== Preparing your analysis (attempt {}/{}) ==", attempt, max_attempts),
        Screen::AnalysisResults(result) => {
            format!("== Results == (e: end call)\n{}", analysis(result))
        }
    }
}

pub fn analysis(result: &AnalysisResult) -> String {
    let mut out = format!("Grade: {}\n", result.overall_score);
    for (name, dimension) in result.radar_diagram.dimensions() {
        let _ = writeln!(out, "  {:<8} {:>4.1}  {}", name, dimension.score, dimension.insight);
    }
    for item in &result.feedback {
        let _ = writeln!(out, "  - {}", item);
    }
    out.push_str(&result.overall_message);
    out
}

/// One line per event worth showing; expiries are silent.
pub fn event(event: &SessionEvent) -> Option<String> {
    let line = match event {
        SessionEvent::Transcript(line) if line.is_final => match &line.source {
            TranscriptSource::Local => format!("you: {}", line.text),
            TranscriptSource::Remote(identity) => format!("{}: {}", identity, line.text),
            TranscriptSource::StageDirection => line.text.clone(),
        },
        SessionEvent::GoalProgress(progress) => {
            let trend = if progress.improved() { " ↑" } else { "" };
            let done = if progress.is_goal_complete { " (goal reached)" } else { "" };
            format!("[progress {:.0}/10{}{}]", progress.progress_towards_goal, trend, done)
        }
        SessionEvent::CallToAction { text, .. } => format!(">> {}", text),
        SessionEvent::Reaction { token, .. } => format!("[{}]", token),
        SessionEvent::HintAvailable => "[hint available: press h]".to_string(),
        SessionEvent::Hint(hint) => format!("hint ({}): {}", hint.category, hint.hint),
        SessionEvent::ConversationEnded { message } if !message.is_empty() => {
            format!("[conversation ended] {}", message)
        }
        SessionEvent::ConversationEnded { .. } => "[conversation ended]".to_string(),
        SessionEvent::AnalysisFailed { attempts, reason } => {
            format!("Analysis failed after {} attempts: {}", attempts, reason)
        }
        SessionEvent::DeviceError { message } => format!("Microphone unavailable: {}", message),
        SessionEvent::ConnectionFailed { reason } => format!("Could not connect: {}", reason),
        SessionEvent::Disconnected { reason } => format!("[disconnected: {}]", reason),
        _ => return None,
    };
    Some(line)
}
