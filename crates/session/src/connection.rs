//! Connection Manager
//!
//! Turns a selected scenario into a live room: fetch connection details, join
//! the room, then open the microphone. A failure at any step leaves nothing
//! connected behind.

use crate::error::SessionError;
use crate::token::TokenIssuer;
use kiyomi_core::{ConnectionDetails, Scenario, UserProfile};
use kiyomi_realtime::{RealtimeError, RealtimeRoom, RoomEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Creates a fresh, unconnected room for each call.
pub type RoomFactory = Arc<dyn Fn() -> Arc<dyn RealtimeRoom> + Send + Sync>;

pub struct ConnectionManager {
    issuer: Arc<dyn TokenIssuer>,
    room_factory: RoomFactory,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionManager {
    pub fn new(issuer: Arc<dyn TokenIssuer>, room_factory: RoomFactory) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            issuer,
            room_factory,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Opens a session for `scenario`.
    ///
    /// On a microphone failure the room is closed again and
    /// [`SessionError::Device`] is returned; the caller may simply retry.
    #[instrument(skip(self, scenario, profile), fields(scenario = %scenario.id))]
    pub async fn connect(&self, scenario: &Scenario, profile: &UserProfile) -> Result<SessionHandle, SessionError> {
        self.state.send_replace(ConnectionState::Connecting);

        let details = match self.issuer.issue(scenario, profile).await {
            Ok(details) => details,
            Err(e) => {
                warn!(error = %e, "Token exchange failed");
                self.state.send_replace(ConnectionState::Disconnected);
                return Err(SessionError::Token(e));
            }
        };

        let room = (self.room_factory)();
        let events = room.subscribe();
        if let Err(e) = room
            .connect(&details.server_url, &details.participant_token)
            .await
        {
            warn!(error = %e, "Failed to join room");
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(e.into());
        }

        if let Err(e) = room.enable_microphone().await {
            warn!(error = %e, "Microphone could not be enabled; closing room");
            room.disconnect().await;
            self.state.send_replace(ConnectionState::Disconnected);
            return Err(match e {
                RealtimeError::Device(message) => SessionError::Device(message),
                other => other.into(),
            });
        }

        self.state.send_replace(ConnectionState::Connected);
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            room,
            details,
            events: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        };
        info!(session_id = %handle.id, room = %handle.details.room_name, "Session connected");
        Ok(handle)
    }
}

/// One connected session. Dropping the handle does not disconnect; call
/// [`SessionHandle::disconnect`].
pub struct SessionHandle {
    id: Uuid,
    room: Arc<dyn RealtimeRoom>,
    details: ConnectionDetails,
    events: Mutex<Option<broadcast::Receiver<RoomEvent>>>,
    closed: AtomicBool,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room(&self) -> &Arc<dyn RealtimeRoom> {
        &self.room
    }

    pub fn details(&self) -> &ConnectionDetails {
        &self.details
    }

    /// Room events received since the room was joined. Can be taken once.
    pub fn take_events(&self) -> Option<broadcast::Receiver<RoomEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// The practice agent, i.e. the first remote participant.
    pub fn agent_identity(&self) -> Option<String> {
        self.room.remote_participants().into_iter().next()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Leaves the room. Later calls do nothing.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.room.disconnect().await;
        self.state.send_replace(ConnectionState::Disconnected);
        info!(session_id = %self.id, "Session disconnected");
    }
}
