//! Defines the JSON frame protocol spoken with the room relay.

use crate::error::RpcError;
use serde::{Deserialize, Serialize};

/// Frames exchanged with the relay, in both directions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame on a new socket. Carries the participant token.
    Join { token: String },
    /// The relay accepted the token.
    Joined {
        identity: String,
        #[serde(default)]
        participants: Vec<String>,
    },
    ParticipantJoined { identity: String },
    ParticipantLeft { identity: String },
    /// A call to a method on another participant. The relay fills in
    /// `caller_identity` when forwarding.
    RpcRequest {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller_identity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination_identity: Option<String>,
        method: String,
        payload: String,
        response_timeout_ms: u64,
    },
    /// The answer to an earlier `rpc_request`; exactly one of `payload` and
    /// `error` is set.
    RpcResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    Transcription {
        participant_identity: String,
        text: String,
        #[serde(default = "default_final")]
        is_final: bool,
    },
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

fn default_final() -> bool {
    true
}

impl Frame {
    pub fn rpc_result(request_id: String, result: Result<String, RpcError>) -> Self {
        match result {
            Ok(payload) => Frame::RpcResponse {
                request_id,
                payload: Some(payload),
                error: None,
            },
            Err(error) => Frame::RpcResponse {
                request_id,
                payload: None,
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rpc_request_wire_shape() {
        let frame = Frame::RpcRequest {
            request_id: "r1".to_string(),
            caller_identity: None,
            destination_identity: Some("agent".to_string()),
            method: "hint".to_string(),
            payload: "".to_string(),
            response_timeout_ms: 10_000,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "rpc_request",
                "request_id": "r1",
                "destination_identity": "agent",
                "method": "hint",
                "payload": "",
                "response_timeout_ms": 10000
            })
        );
    }

    #[test]
    fn test_inbound_frames_parse_with_defaults() {
        let joined: Frame = serde_json::from_str(r#"{"type":"joined","identity":"user-1"}"#).unwrap();
        assert_eq!(
            joined,
            Frame::Joined {
                identity: "user-1".to_string(),
                participants: vec![]
            }
        );

        let line: Frame = serde_json::from_str(
            r#"{"type":"transcription","participant_identity":"agent","text":"Hello"}"#,
        )
        .unwrap();
        assert!(matches!(line, Frame::Transcription { is_final: true, .. }));
    }

    #[test]
    fn test_rpc_result_carries_error() {
        let frame = Frame::rpc_result("r2".to_string(), Err(RpcError::application("bad payload")));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "rpc_response");
        assert_eq!(value["error"]["code"], 1500);
        assert!(value.get("payload").is_none());
    }
}
