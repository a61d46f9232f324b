//! Presentation State Machine
//!
//! Which screen of the call flow the user is looking at. Every change goes
//! through [`Presentation::transition`], which rejects moves the flow does not
//! allow.

use crate::error::SessionError;
use kiyomi_core::AnalysisResult;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    /// Choosing a skill and scenario.
    Setup,
    /// The stage direction, shown alone before connecting.
    RoleplayIntro { stage_direction: String },
    Live,
    AnalysisPreparing { attempt: u32, max_attempts: u32 },
    AnalysisResults(Box<AnalysisResult>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenKind {
    Setup,
    RoleplayIntro,
    Live,
    AnalysisPreparing,
    AnalysisResults,
}

impl Screen {
    pub fn kind(&self) -> ScreenKind {
        match self {
            Screen::Setup => ScreenKind::Setup,
            Screen::RoleplayIntro { .. } => ScreenKind::RoleplayIntro,
            Screen::Live => ScreenKind::Live,
            Screen::AnalysisPreparing { .. } => ScreenKind::AnalysisPreparing,
            Screen::AnalysisResults(_) => ScreenKind::AnalysisResults,
        }
    }
}

impl ScreenKind {
    pub fn can_move_to(self, next: ScreenKind) -> bool {
        use ScreenKind::*;
        matches!(
            (self, next),
            (Setup, RoleplayIntro)
                | (Setup, Live)
                | (RoleplayIntro, Live)
                | (RoleplayIntro, Setup)
                | (Live, AnalysisPreparing)
                | (Live, Setup)
                | (AnalysisPreparing, AnalysisPreparing)
                | (AnalysisPreparing, AnalysisResults)
                | (AnalysisPreparing, Setup)
                | (AnalysisResults, Setup)
        )
    }
}

pub struct Presentation {
    screen: watch::Sender<Screen>,
}

impl Default for Presentation {
    fn default() -> Self {
        Self::new()
    }
}

impl Presentation {
    pub fn new() -> Self {
        let (screen, _) = watch::channel(Screen::Setup);
        Self { screen }
    }

    pub fn subscribe(&self) -> watch::Receiver<Screen> {
        self.screen.subscribe()
    }

    pub fn current(&self) -> Screen {
        self.screen.borrow().clone()
    }

    pub fn kind(&self) -> ScreenKind {
        self.screen.borrow().kind()
    }

    /// Moves to `next` if the flow allows it from the current screen.
    pub fn transition(&self, next: Screen) -> Result<(), SessionError> {
        let mut outcome = Ok(());
        self.screen.send_if_modified(|current| {
            let (from, to) = (current.kind(), next.kind());
            if from.can_move_to(to) {
                debug!(?from, ?to, "Screen transition");
                *current = next;
                true
            } else {
                outcome = Err(SessionError::InvalidTransition { from, to });
                false
            }
        });
        outcome
    }

    /// Like [`transition`](Self::transition), but only when the current screen
    /// is `expected`.
    pub fn transition_from(&self, expected: ScreenKind, next: Screen) -> Result<(), SessionError> {
        let mut outcome = Ok(());
        self.screen.send_if_modified(|current| {
            let (from, to) = (current.kind(), next.kind());
            if from == expected && from.can_move_to(to) {
                debug!(?from, ?to, "Screen transition");
                *current = next;
                true
            } else {
                outcome = Err(SessionError::InvalidTransition { from, to });
                false
            }
        });
        outcome
    }
}
