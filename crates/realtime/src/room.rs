//! The realtime room contract shared by every transport.
//!
//! A room is one participant's view of a realtime session: it connects with a
//! credential, exposes named methods the other participants may call, and calls
//! methods they expose.

use crate::error::{RealtimeError, RpcError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// How long an outbound call waits for its answer unless told otherwise.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Capacity of the per-room event broadcast channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An inbound call delivered to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcInvocation {
    pub request_id: String,
    pub caller_identity: String,
    pub payload: String,
    pub response_timeout: Duration,
}

pub type RpcFuture = Pin<Box<dyn Future<Output = Result<String, RpcError>> + Send>>;
pub type RpcHandler = Arc<dyn Fn(RpcInvocation) -> RpcFuture + Send + Sync>;

/// Wraps an async closure as an [`RpcHandler`].
pub fn rpc_handler<F, Fut>(f: F) -> RpcHandler
where
    F: Fn(RpcInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, RpcError>> + Send + 'static,
{
    Arc::new(move |invocation| Box::pin(f(invocation)))
}

/// Parameters of an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformRpcParams {
    pub destination_identity: String,
    pub method: String,
    pub payload: String,
    pub response_timeout: Duration,
}

impl PerformRpcParams {
    pub fn new(
        destination_identity: impl Into<String>,
        method: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination_identity: destination_identity.into(),
            method: method.into(),
            payload: payload.into(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

/// Things that happen in a room, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Connected { identity: String },
    ParticipantJoined { identity: String },
    ParticipantLeft { identity: String },
    /// A finished or interim line of speech-to-text.
    Transcription {
        participant_identity: String,
        text: String,
        is_final: bool,
    },
    /// The local microphone or camera failed after the room was up.
    MediaDeviceError { message: String },
    Disconnected { reason: String },
}

/// One participant's handle on a realtime session.
#[async_trait]
pub trait RealtimeRoom: Send + Sync {
    /// Joins the room at `url` with a participant token.
    async fn connect(&self, url: &str, token: &str) -> Result<(), RealtimeError>;

    /// Acquires the local audio input and starts publishing it.
    async fn enable_microphone(&self) -> Result<(), RealtimeError>;

    /// Exposes `method` to the other participants. Replaces any earlier handler.
    fn register_rpc_method(&self, method: &str, handler: RpcHandler);

    fn unregister_rpc_method(&self, method: &str);

    /// Calls `method` on another participant and waits for its answer.
    async fn perform_rpc(&self, params: PerformRpcParams) -> Result<String, RpcError>;

    fn local_identity(&self) -> Option<String>;

    fn remote_participants(&self) -> Vec<String>;

    fn subscribe(&self) -> broadcast::Receiver<RoomEvent>;

    fn is_connected(&self) -> bool;

    /// Leaves the room. Safe to call more than once.
    async fn disconnect(&self);
}

/// Method name to handler table used by the room implementations.
#[derive(Default)]
pub struct RpcRegistry {
    handlers: Mutex<HashMap<String, RpcHandler>>,
}

impl RpcRegistry {
    pub fn register(&self, method: &str, handler: RpcHandler) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.insert(method.to_string(), handler).is_some() {
            warn!(%method, "Replacing existing RPC handler");
        }
    }

    pub fn unregister(&self, method: &str) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.remove(method);
    }

    pub fn methods(&self) -> Vec<String> {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let mut methods: Vec<String> = handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Runs the handler for `method`, or answers "unsupported method".
    pub async fn dispatch(&self, method: &str, invocation: RpcInvocation) -> Result<String, RpcError> {
        let handler = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers.get(method).cloned()
        };
        match handler {
            Some(handler) => {
                debug!(%method, request_id = %invocation.request_id, "Dispatching RPC");
                handler(invocation).await
            }
            None => Err(RpcError::unsupported_method(method)),
        }
    }
}
