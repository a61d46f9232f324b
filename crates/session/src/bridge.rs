//! RPC Bridge
//!
//! The named methods exchanged with the practice agent. The agent calls
//! `checker`, `reaction` and `end_conversation` on the user; the user calls
//! `hint` and `postanalyzer` on the agent.

use crate::analysis::AnalysisSource;
use crate::error::{AnalysisError, SessionError};
use async_trait::async_trait;
use kiyomi_core::{AnalysisResult, GoalProgress, HintRecord};
use kiyomi_realtime::{PerformRpcParams, RealtimeRoom, rpc_handler};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const CHECKER: &str = "checker";
pub const REACTION: &str = "reaction";
pub const END_CONVERSATION: &str = "end_conversation";
pub const HINT: &str = "hint";
pub const POSTANALYZER: &str = "postanalyzer";

/// Answer sent back for an accepted inbound call.
pub const ACK: &str = "ok";

/// Receives the validated inbound calls of one session.
pub trait BridgeHandler: Send + Sync {
    fn goal_progress(&self, progress: GoalProgress);
    fn reaction(&self, token: String);
    fn conversation_ended(&self, message: String);
}

pub struct RpcBridge {
    room: Arc<dyn RealtimeRoom>,
    timeout: Duration,
}

impl RpcBridge {
    pub fn new(room: Arc<dyn RealtimeRoom>, timeout: Duration) -> Self {
        Self { room, timeout }
    }

    /// Registers the inbound methods. They stay registered until the returned
    /// subscription is unsubscribed or dropped.
    pub fn subscribe(&self, handler: Arc<dyn BridgeHandler>) -> BridgeSubscription {
        let checker = Arc::clone(&handler);
        self.room.register_rpc_method(
            CHECKER,
            rpc_handler(move |inv| {
                let handler = Arc::clone(&checker);
                async move {
                    match GoalProgress::parse(&inv.payload) {
                        Ok(progress) => {
                            debug!(progress = progress.progress_towards_goal, "Goal progress received");
                            handler.goal_progress(progress);
                            Ok(ACK.to_string())
                        }
                        Err(e) => {
                            warn!(error = %e, "Rejected goal progress payload");
                            Ok(format!("error: {}", e))
                        }
                    }
                }
            }),
        );

        let reaction = Arc::clone(&handler);
        self.room.register_rpc_method(
            REACTION,
            rpc_handler(move |inv| {
                let handler = Arc::clone(&reaction);
                async move {
                    let token = inv.payload.trim();
                    if token.is_empty() {
                        warn!("Rejected empty reaction");
                        return Ok("error: empty reaction".to_string());
                    }
                    handler.reaction(token.to_string());
                    Ok(ACK.to_string())
                }
            }),
        );

        let ended = handler;
        self.room.register_rpc_method(
            END_CONVERSATION,
            rpc_handler(move |inv| {
                let handler = Arc::clone(&ended);
                async move {
                    let message = closing_message(&inv.payload);
                    info!(%message, "Agent ended the conversation");
                    handler.conversation_ended(message);
                    Ok(ACK.to_string())
                }
            }),
        );

        BridgeSubscription {
            room: Arc::clone(&self.room),
            active: AtomicBool::new(true),
        }
    }

    fn agent(&self) -> Option<String> {
        self.room.remote_participants().into_iter().next()
    }

    /// Asks the agent for a hint on the current conversation.
    #[instrument(skip(self))]
    pub async fn request_hint(&self) -> Result<HintRecord, SessionError> {
        let agent = self.agent().ok_or(SessionError::AgentNotPresent)?;
        let payload = self
            .room
            .perform_rpc(PerformRpcParams::new(agent, HINT, "").with_timeout(self.timeout))
            .await?;
        Ok(HintRecord::parse(&payload)?)
    }

    /// Asks the agent for the post-call report.
    #[instrument(skip(self))]
    pub async fn request_analysis(&self) -> Result<AnalysisResult, AnalysisError> {
        let agent = self.agent().ok_or(AnalysisError::AgentNotPresent)?;
        let payload = self
            .room
            .perform_rpc(PerformRpcParams::new(agent, POSTANALYZER, "").with_timeout(self.timeout))
            .await?;
        Ok(AnalysisResult::parse(&payload)?)
    }
}

#[async_trait]
impl AnalysisSource for RpcBridge {
    async fn fetch_analysis(&self) -> Result<AnalysisResult, AnalysisError> {
        self.request_analysis().await
    }
}

/// `{"message": "..."}`, a JSON string, or plain text.
fn closing_message(payload: &str) -> String {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Ok(Value::String(message)) => message,
        _ => payload.trim().to_string(),
    }
}

/// Keeps the inbound methods registered on a room.
pub struct BridgeSubscription {
    room: Arc<dyn RealtimeRoom>,
    active: AtomicBool,
}

impl BridgeSubscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        for method in [CHECKER, REACTION, END_CONVERSATION] {
            self.room.unregister_rpc_method(method);
        }
        debug!("RPC methods unregistered");
    }
}

impl Drop for BridgeSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
