use crate::presentation::ScreenKind;
use kiyomi_core::ParseError;
use kiyomi_realtime::{RealtimeError, RpcError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No scenario selected")]
    NoScenarioSelected,
    #[error("A call is already in progress")]
    CallInProgress,
    #[error("No active call")]
    NoActiveCall,
    #[error("Failed to obtain connection details: {0:#}")]
    Token(anyhow::Error),
    #[error("Microphone unavailable: {0}")]
    Device(String),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Invalid payload from the practice agent: {0}")]
    Parse(#[from] ParseError),
    #[error("Cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: ScreenKind, to: ScreenKind },
    #[error("Hints are not available yet")]
    HintNotAvailable,
    #[error("The practice agent has not joined the room")]
    AgentNotPresent,
    #[error("The call was left before it started")]
    Cancelled,
}

/// Why one post-call analysis attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Analysis payload rejected: {0}")]
    Parse(#[from] ParseError),
    #[error("The practice agent has not joined the room")]
    AgentNotPresent,
}
