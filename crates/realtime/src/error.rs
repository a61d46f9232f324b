use serde::{Deserialize, Serialize};

/// Error returned by a remote procedure call, on either side of the channel.
///
/// Codes below 1500 are reserved for the transport; handlers report failures
/// with [`RpcError::application`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RpcError {
    pub const SEND_FAILED: u32 = 1001;
    pub const UNSUPPORTED_METHOD: u32 = 1400;
    pub const RECIPIENT_NOT_FOUND: u32 = 1401;
    pub const APPLICATION_ERROR: u32 = 1500;
    pub const CONNECTION_TIMEOUT: u32 = 1501;
    pub const RESPONSE_TIMEOUT: u32 = 1502;
    pub const RECIPIENT_DISCONNECTED: u32 = 1503;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// A failure raised by the handler itself.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(Self::APPLICATION_ERROR, message)
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_METHOD,
            format!("Method not supported at destination: {}", method),
        )
    }

    pub fn response_timeout() -> Self {
        Self::new(Self::RESPONSE_TIMEOUT, "Response timeout")
    }

    pub fn recipient_disconnected() -> Self {
        Self::new(Self::RECIPIENT_DISCONNECTED, "Recipient disconnected")
    }

    pub fn recipient_not_found(identity: &str) -> Self {
        Self::new(
            Self::RECIPIENT_NOT_FOUND,
            format!("Recipient not found: {}", identity),
        )
    }

    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::new(Self::SEND_FAILED, reason)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.code, Self::CONNECTION_TIMEOUT | Self::RESPONSE_TIMEOUT)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("Failed to connect to room: {0}")]
    Connect(String),
    #[error("Media device unavailable: {0}")]
    Device(String),
    #[error("Room is not connected")]
    NotConnected,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
}
