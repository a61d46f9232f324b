use futures_util::{SinkExt, StreamExt};
use kiyomi_realtime::protocol::Frame;
use kiyomi_realtime::{PerformRpcParams, RealtimeRoom, RoomEvent, RpcError, WsRoom, rpc_handler};
use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

type RelaySocket = WebSocketStream<TcpStream>;

/// Serves a single client with `script` and returns the url to dial.
async fn spawn_relay<F, Fut>(script: F) -> String
where
    F: FnOnce(RelaySocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        script(ws).await;
    });
    format!("ws://{}", addr)
}

async fn recv(ws: &mut RelaySocket) -> Frame {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

async fn send(ws: &mut RelaySocket, frame: Frame) {
    let json = serde_json::to_string(&frame).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

async fn accept_join(ws: &mut RelaySocket) {
    match recv(ws).await {
        Frame::Join { token } => assert_eq!(token, "participant-token"),
        other => panic!("expected join, got {:?}", other),
    }
    send(
        ws,
        Frame::Joined {
            identity: "user".to_string(),
            participants: vec!["agent".to_string()],
        },
    )
    .await;
}

#[tokio::test]
async fn test_outbound_rpc_is_answered_by_request_id() {
    let url = spawn_relay(|mut ws| async move {
        accept_join(&mut ws).await;
        let Frame::RpcRequest {
            request_id,
            destination_identity,
            method,
            ..
        } = recv(&mut ws).await
        else {
            panic!("expected rpc_request");
        };
        assert_eq!(destination_identity.as_deref(), Some("agent"));
        assert_eq!(method, "hint");
        send(
            &mut ws,
            Frame::rpc_result(request_id, Ok(r#"{"hint":"Mirror their words"}"#.to_string())),
        )
        .await;
        let _ = recv(&mut ws).await;
    })
    .await;

    let room = WsRoom::new();
    room.connect(&url, "participant-token").await.unwrap();
    assert_eq!(room.local_identity().as_deref(), Some("user"));
    assert_eq!(room.remote_participants(), vec!["agent".to_string()]);

    let answer = room
        .perform_rpc(PerformRpcParams::new("agent", "hint", ""))
        .await
        .unwrap();
    assert_eq!(answer, r#"{"hint":"Mirror their words"}"#);
    room.disconnect().await;
    assert!(!room.is_connected());
}

#[tokio::test]
async fn test_inbound_requests_are_dispatched_to_handlers() {
    let (done_tx, done_rx) = oneshot::channel();
    let url = spawn_relay(|mut ws| async move {
        accept_join(&mut ws).await;
        send(
            &mut ws,
            Frame::RpcRequest {
                request_id: "a".to_string(),
                caller_identity: Some("agent".to_string()),
                destination_identity: None,
                method: "checker".to_string(),
                payload: "progress".to_string(),
                response_timeout_ms: 10_000,
            },
        )
        .await;
        let first = recv(&mut ws).await;
        send(
            &mut ws,
            Frame::RpcRequest {
                request_id: "b".to_string(),
                caller_identity: Some("agent".to_string()),
                destination_identity: None,
                method: "not_registered".to_string(),
                payload: String::new(),
                response_timeout_ms: 10_000,
            },
        )
        .await;
        let second = recv(&mut ws).await;
        let _ = done_tx.send((first, second));
    })
    .await;

    let room = WsRoom::new();
    room.register_rpc_method(
        "checker",
        rpc_handler(|inv| async move { Ok(format!("{} from {}", inv.payload, inv.caller_identity)) }),
    );
    room.connect(&url, "participant-token").await.unwrap();

    let (first, second) = done_rx.await.unwrap();
    assert_eq!(
        first,
        Frame::rpc_result("a".to_string(), Ok("progress from agent".to_string()))
    );
    match second {
        Frame::RpcResponse {
            request_id,
            error: Some(error),
            ..
        } => {
            assert_eq!(request_id, "b");
            assert_eq!(error.code, RpcError::UNSUPPORTED_METHOD);
        }
        other => panic!("expected error response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unanswered_rpc_times_out() {
    let url = spawn_relay(|mut ws| async move {
        accept_join(&mut ws).await;
        while ws.next().await.is_some() {}
    })
    .await;

    let room = WsRoom::new();
    room.connect(&url, "participant-token").await.unwrap();
    let err = room
        .perform_rpc(
            PerformRpcParams::new("agent", "postanalyzer", "")
                .with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, RpcError::RESPONSE_TIMEOUT);
}

#[tokio::test]
async fn test_relay_close_disconnects_room() {
    let url = spawn_relay(|mut ws| async move {
        accept_join(&mut ws).await;
        send(
            &mut ws,
            Frame::Transcription {
                participant_identity: "agent".to_string(),
                text: "Hi there".to_string(),
                is_final: true,
            },
        )
        .await;
        let _ = ws.close(None).await;
    })
    .await;

    let room = WsRoom::new();
    let mut events = room.subscribe();
    room.connect(&url, "participant-token").await.unwrap();

    assert!(matches!(events.recv().await.unwrap(), RoomEvent::Connected { .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        RoomEvent::Transcription { ref text, .. } if text == "Hi there"
    ));
    assert!(matches!(events.recv().await.unwrap(), RoomEvent::Disconnected { .. }));
    assert!(!room.is_connected());

    let err = room
        .perform_rpc(PerformRpcParams::new("agent", "hint", ""))
        .await
        .unwrap_err();
    assert_eq!(err.code, RpcError::SEND_FAILED);
}
