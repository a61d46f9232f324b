//! In-process rooms joined through a shared hub.
//!
//! Calls between loopback rooms run the callee's handler directly, so tests can
//! stand up both sides of a session without a relay.

use crate::error::{RealtimeError, RpcError};
use crate::room::{
    EVENT_CHANNEL_CAPACITY, PerformRpcParams, RealtimeRoom, RoomEvent, RpcHandler, RpcInvocation,
    RpcRegistry,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The set of loopback rooms currently connected to one session.
#[derive(Default)]
pub struct LoopbackHub {
    members: Mutex<BTreeMap<String, Arc<Member>>>,
}

struct Member {
    identity: String,
    registry: RpcRegistry,
    events: broadcast::Sender<RoomEvent>,
    connected: AtomicBool,
    microphone_available: AtomicBool,
    microphone_enabled: AtomicBool,
    connected_with: Mutex<Option<(String, String)>>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a room that will appear as `identity` once connected.
    pub fn room(self: &Arc<Self>, identity: &str) -> LoopbackRoom {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        LoopbackRoom {
            hub: Arc::clone(self),
            member: Arc::new(Member {
                identity: identity.to_string(),
                registry: RpcRegistry::default(),
                events,
                connected: AtomicBool::new(false),
                microphone_available: AtomicBool::new(true),
                microphone_enabled: AtomicBool::new(false),
                connected_with: Mutex::new(None),
            }),
        }
    }

    fn member(&self, identity: &str) -> Option<Arc<Member>> {
        lock(&self.members).get(identity).cloned()
    }

    fn others(&self, identity: &str) -> Vec<Arc<Member>> {
        lock(&self.members)
            .values()
            .filter(|m| m.identity != identity)
            .cloned()
            .collect()
    }

    fn broadcast(&self, event: RoomEvent) {
        for member in lock(&self.members).values() {
            let _ = member.events.send(event.clone());
        }
    }
}

pub struct LoopbackRoom {
    hub: Arc<LoopbackHub>,
    member: Arc<Member>,
}

impl LoopbackRoom {
    /// Two rooms on a fresh hub, typically the user and the practice agent.
    pub fn pair(local: &str, remote: &str) -> (LoopbackRoom, LoopbackRoom) {
        let hub = LoopbackHub::new();
        (hub.room(local), hub.room(remote))
    }

    pub fn hub(&self) -> Arc<LoopbackHub> {
        Arc::clone(&self.hub)
    }

    pub fn identity(&self) -> &str {
        &self.member.identity
    }

    /// Makes the next `enable_microphone` fail as if no device were present.
    pub fn set_microphone_available(&self, available: bool) {
        self.member
            .microphone_available
            .store(available, Ordering::SeqCst);
    }

    pub fn microphone_enabled(&self) -> bool {
        self.member.microphone_enabled.load(Ordering::SeqCst)
    }

    pub fn registered_methods(&self) -> Vec<String> {
        self.member.registry.methods()
    }

    /// The url and token of the last successful `connect`.
    pub fn connected_with(&self) -> Option<(String, String)> {
        lock(&self.member.connected_with).clone()
    }

    /// Sends a transcription line spoken by this participant to everyone in the room.
    pub fn publish_transcription(&self, text: &str, is_final: bool) {
        self.hub.broadcast(RoomEvent::Transcription {
            participant_identity: self.member.identity.clone(),
            text: text.to_string(),
            is_final,
        });
    }

    /// Reports a media failure on this room as the device layer would.
    pub fn fail_media_device(&self, message: &str) {
        self.member.microphone_enabled.store(false, Ordering::SeqCst);
        let _ = self.member.events.send(RoomEvent::MediaDeviceError {
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl RealtimeRoom for LoopbackRoom {
    async fn connect(&self, url: &str, token: &str) -> Result<(), RealtimeError> {
        if self.member.connected.swap(true, Ordering::SeqCst) {
            return Err(RealtimeError::Connect("Room is already connected".to_string()));
        }
        let identity = self.member.identity.clone();
        {
            let mut members = lock(&self.hub.members);
            if members.contains_key(&identity) {
                self.member.connected.store(false, Ordering::SeqCst);
                return Err(RealtimeError::Connect(format!(
                    "Identity {} is already in the room",
                    identity
                )));
            }
            members.insert(identity.clone(), Arc::clone(&self.member));
        }
        *lock(&self.member.connected_with) = Some((url.to_string(), token.to_string()));
        debug!(%identity, "Loopback room connected");

        let _ = self.member.events.send(RoomEvent::Connected {
            identity: identity.clone(),
        });
        for other in self.hub.others(&identity) {
            let _ = other.events.send(RoomEvent::ParticipantJoined {
                identity: identity.clone(),
            });
        }
        Ok(())
    }

    async fn enable_microphone(&self) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        if !self.member.microphone_available.load(Ordering::SeqCst) {
            return Err(RealtimeError::Device("Requested device not found".to_string()));
        }
        self.member.microphone_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn register_rpc_method(&self, method: &str, handler: RpcHandler) {
        self.member.registry.register(method, handler);
    }

    fn unregister_rpc_method(&self, method: &str) {
        self.member.registry.unregister(method);
    }

    async fn perform_rpc(&self, params: PerformRpcParams) -> Result<String, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::send_failed("Room is not connected"));
        }
        let target = self
            .hub
            .member(&params.destination_identity)
            .ok_or_else(|| RpcError::recipient_not_found(&params.destination_identity))?;

        let invocation = RpcInvocation {
            request_id: Uuid::new_v4().to_string(),
            caller_identity: self.member.identity.clone(),
            payload: params.payload,
            response_timeout: params.response_timeout,
        };
        tokio::time::timeout(
            params.response_timeout,
            target.registry.dispatch(&params.method, invocation),
        )
        .await
        .unwrap_or_else(|_| Err(RpcError::response_timeout()))
    }

    fn local_identity(&self) -> Option<String> {
        self.is_connected().then(|| self.member.identity.clone())
    }

    fn remote_participants(&self) -> Vec<String> {
        if !self.is_connected() {
            return Vec::new();
        }
        self.hub
            .others(&self.member.identity)
            .into_iter()
            .map(|m| m.identity.clone())
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.member.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.member.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if !self.member.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let identity = self.member.identity.clone();
        lock(&self.hub.members).remove(&identity);
        self.member.microphone_enabled.store(false, Ordering::SeqCst);
        for other in self.hub.others(&identity) {
            let _ = other.events.send(RoomEvent::ParticipantLeft {
                identity: identity.clone(),
            });
        }
        let _ = self.member.events.send(RoomEvent::Disconnected {
            reason: "left the room".to_string(),
        });
    }
}
