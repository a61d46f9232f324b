//! A room backed by a WebSocket connection to a JSON frame relay.
//!
//! The relay forwards `rpc_request` / `rpc_response` frames between the
//! participants of a room and announces joins, leaves, and transcription lines.

use crate::devices::{AudioInput, SilentInput};
use crate::error::{RealtimeError, RpcError};
use crate::protocol::Frame;
use crate::room::{
    EVENT_CHANNEL_CAPACITY, PerformRpcParams, RealtimeRoom, RoomEvent, RpcHandler, RpcInvocation,
    RpcRegistry,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How long `connect` waits for the relay to accept the token.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const LEAVE_GRACE: Duration = Duration::from_secs(2);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingCalls = HashMap<String, oneshot::Sender<Result<String, RpcError>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WsRoom {
    shared: Arc<Shared>,
    audio: Arc<dyn AudioInput>,
    join_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    registry: RpcRegistry,
    events: broadcast::Sender<RoomEvent>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending: Mutex<PendingCalls>,
    identity: Mutex<Option<String>>,
    participants: Mutex<BTreeSet<String>>,
    connected: AtomicBool,
}

impl Default for WsRoom {
    fn default() -> Self {
        Self::new()
    }
}

impl WsRoom {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                registry: RpcRegistry::default(),
                events,
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                identity: Mutex::new(None),
                participants: Mutex::new(BTreeSet::new()),
                connected: AtomicBool::new(false),
            }),
            audio: Arc::new(SilentInput),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            task: Mutex::new(None),
        }
    }

    /// Uses `audio` as the capture device opened by `enable_microphone`.
    pub fn with_audio_input(mut self, audio: Arc<dyn AudioInput>) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

impl Drop for WsRoom {
    fn drop(&mut self) {
        // Closing the outbound channel ends the socket task.
        lock(&self.shared.outbound).take();
    }
}

#[async_trait]
impl RealtimeRoom for WsRoom {
    #[instrument(skip(self, token))]
    async fn connect(&self, url: &str, token: &str) -> Result<(), RealtimeError> {
        if self.is_connected() {
            return Err(RealtimeError::Connect("Room is already connected".to_string()));
        }

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();

        send_frame(
            &mut sink,
            &Frame::Join {
                token: token.to_string(),
            },
        )
        .await?;

        let (identity, participants) = tokio::time::timeout(self.join_timeout, await_joined(&mut stream))
            .await
            .map_err(|_| RealtimeError::Connect("Timed out waiting for the relay to accept the token".to_string()))??;
        info!(%identity, participants = participants.len(), "Joined room");

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.outbound) = Some(tx);
        *lock(&self.shared.identity) = Some(identity.clone());
        *lock(&self.shared.participants) = participants.into_iter().collect();
        self.shared.connected.store(true, Ordering::SeqCst);
        let _ = self.shared.events.send(RoomEvent::Connected { identity });

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run(shared, sink, stream, rx));
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    async fn enable_microphone(&self) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        self.audio.acquire().await
    }

    fn register_rpc_method(&self, method: &str, handler: RpcHandler) {
        self.shared.registry.register(method, handler);
    }

    fn unregister_rpc_method(&self, method: &str) {
        self.shared.registry.unregister(method);
    }

    #[instrument(skip(self, params), fields(method = %params.method, destination = %params.destination_identity))]
    async fn perform_rpc(&self, params: PerformRpcParams) -> Result<String, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::send_failed("Room is not connected"));
        }
        if !lock(&self.shared.participants).contains(&params.destination_identity) {
            return Err(RpcError::recipient_not_found(&params.destination_identity));
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(request_id.clone(), tx);

        let frame = Frame::RpcRequest {
            request_id: request_id.clone(),
            caller_identity: None,
            destination_identity: Some(params.destination_identity),
            method: params.method,
            payload: params.payload,
            response_timeout_ms: params.response_timeout.as_millis() as u64,
        };
        if !self.shared.send(frame) {
            lock(&self.shared.pending).remove(&request_id);
            return Err(RpcError::send_failed("Room is not connected"));
        }

        match tokio::time::timeout(params.response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::recipient_disconnected()),
            Err(_) => {
                lock(&self.shared.pending).remove(&request_id);
                warn!(%request_id, "RPC response timed out");
                Err(RpcError::response_timeout())
            }
        }
    }

    fn local_identity(&self) -> Option<String> {
        lock(&self.shared.identity).clone()
    }

    fn remote_participants(&self) -> Vec<String> {
        lock(&self.shared.participants).iter().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.shared.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if let Some(tx) = lock(&self.shared.outbound).take() {
            let _ = tx.send(Frame::Leave { reason: None });
        }
        let task = lock(&self.task).take();
        if let Some(mut task) = task {
            if tokio::time::timeout(LEAVE_GRACE, &mut task).await.is_err() {
                warn!("Socket task did not finish after leave; aborting");
                task.abort();
            }
        }
        self.audio.release();
        self.shared.shut_down("left the room");
    }
}

impl Shared {
    fn send(&self, frame: Frame) -> bool {
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::ParticipantJoined { identity } => {
                lock(&self.participants).insert(identity.clone());
                let _ = self.events.send(RoomEvent::ParticipantJoined { identity });
            }
            Frame::ParticipantLeft { identity } => {
                lock(&self.participants).remove(&identity);
                let _ = self.events.send(RoomEvent::ParticipantLeft { identity });
            }
            Frame::RpcRequest {
                request_id,
                caller_identity,
                method,
                payload,
                response_timeout_ms,
                ..
            } => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let invocation = RpcInvocation {
                        request_id: request_id.clone(),
                        caller_identity: caller_identity.unwrap_or_default(),
                        payload,
                        response_timeout: Duration::from_millis(response_timeout_ms),
                    };
                    let result = shared.registry.dispatch(&method, invocation).await;
                    if !shared.send(Frame::rpc_result(request_id, result)) {
                        debug!(%method, "Dropped RPC response after the room closed");
                    }
                });
            }
            Frame::RpcResponse {
                request_id,
                payload,
                error,
            } => {
                let result = match error {
                    Some(error) => Err(error),
                    None => Ok(payload.unwrap_or_default()),
                };
                match lock(&self.pending).remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => debug!(%request_id, "Response for an unknown or expired request"),
                }
            }
            Frame::Transcription {
                participant_identity,
                text,
                is_final,
            } => {
                let _ = self.events.send(RoomEvent::Transcription {
                    participant_identity,
                    text,
                    is_final,
                });
            }
            Frame::Join { .. } | Frame::Joined { .. } | Frame::Leave { .. } => {
                debug!(?frame, "Ignoring unexpected frame");
            }
        }
    }

    fn shut_down(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        lock(&self.outbound).take();
        lock(&self.participants).clear();
        for (_, tx) in lock(&self.pending).drain() {
            let _ = tx.send(Err(RpcError::recipient_disconnected()));
        }
        info!(%reason, "Room disconnected");
        let _ = self.events.send(RoomEvent::Disconnected {
            reason: reason.to_string(),
        });
    }
}

async fn send_frame(sink: &mut SplitSink<Socket, Message>, frame: &Frame) -> Result<(), RealtimeError> {
    let json = serde_json::to_string(frame)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn await_joined(stream: &mut SplitStream<Socket>) -> Result<(String, Vec<String>), RealtimeError> {
    while let Some(msg) = stream.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<Frame>(&text)? {
                Frame::Joined {
                    identity,
                    participants,
                } => return Ok((identity, participants)),
                Frame::Leave { reason } => {
                    return Err(RealtimeError::Connect(
                        reason.unwrap_or_else(|| "Relay rejected the token".to_string()),
                    ));
                }
                other => debug!(?other, "Frame before join acknowledgement"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(RealtimeError::Connect("Relay closed the connection".to_string()))
}

/// Drives one socket until either side closes it.
async fn run(
    shared: Arc<Shared>,
    mut sink: SplitSink<Socket, Message>,
    mut stream: SplitStream<Socket>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    let reason = loop {
        tokio::select! {
            biased;
            outbound = rx.recv() => match outbound {
                Some(frame) => {
                    let leaving = matches!(frame, Frame::Leave { .. });
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        warn!(error = %e, "Failed to send frame");
                        break "send failed".to_string();
                    }
                    if leaving {
                        let _ = sink.close().await;
                        break "left the room".to_string();
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break "room dropped".to_string();
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                    Ok(Frame::Leave { reason }) => {
                        break reason.unwrap_or_else(|| "removed by the relay".to_string());
                    }
                    Ok(frame) => shared.handle_frame(frame),
                    Err(e) => warn!(error = %e, "Malformed frame from relay"),
                },
                Some(Ok(Message::Close(_))) | None => break "relay closed the connection".to_string(),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break e.to_string();
                }
            },
        }
    };
    shared.shut_down(&reason);
}
