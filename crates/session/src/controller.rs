//! Call controller
//!
//! Sequences one practice call: scenario selection, the optional roleplay intro,
//! the live conversation with its inbound agent updates, and the post-call
//! analysis. Everything that belongs to a single call lives in an `ActiveCall`
//! that is dropped when the flow returns to `Setup`.

use crate::analysis::{AnalysisRetryLoop, RetryOutcome};
use crate::bridge::{BridgeHandler, BridgeSubscription, RpcBridge};
use crate::connection::{ConnectionManager, ConnectionState, SessionHandle};
use crate::error::SessionError;
use crate::feed::{TransientFeed, TransientItem};
use crate::presentation::{Presentation, Screen, ScreenKind};
use crate::timings::CallTimings;
use kiyomi_core::{AnalysisResult, GoalProgress, HintRecord, Scenario, UserProfile};
use kiyomi_realtime::RoomEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptSource {
    /// The user.
    Local,
    /// Another participant, usually the practice agent.
    Remote(String),
    /// The opening's stage direction.
    StageDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLine {
    pub source: TranscriptSource,
    pub text: String,
    pub is_final: bool,
}

/// Notifications for whoever renders the call.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Transcript(TranscriptLine),
    GoalProgress(GoalProgress),
    CallToAction { id: u64, text: String },
    CallToActionExpired { id: u64 },
    Reaction { id: u64, token: String },
    ReactionExpired { id: u64 },
    HintAvailable,
    Hint(HintRecord),
    ConversationEnded { message: String },
    AnalysisAttempt { attempt: u32, max_attempts: u32 },
    AnalysisReady(Box<AnalysisResult>),
    /// Every attempt failed; the flow is back at `Setup`.
    AnalysisFailed { attempts: u32, reason: String },
    DeviceError { message: String },
    ConnectionFailed { reason: String },
    Disconnected { reason: String },
}

#[derive(Default)]
struct CallState {
    transcript: Vec<TranscriptLine>,
    goal_progress: Option<GoalProgress>,
    hint: Option<HintRecord>,
    analysis: Option<AnalysisResult>,
    closing_message: Option<String>,
}

struct ActiveCall {
    handle: SessionHandle,
    bridge: Arc<RpcBridge>,
    subscription: Mutex<Option<BridgeSubscription>>,
    cancel: CancellationToken,
    state: Mutex<CallState>,
    reactions: TransientFeed<String>,
    banners: TransientFeed<String>,
    retry: AnalysisRetryLoop,
    hint_available: AtomicBool,
}

impl ActiveCall {
    /// Stops timers, unregisters the inbound methods and leaves the room.
    async fn close(&self) {
        self.cancel.cancel();
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.reactions.clear();
        self.banners.clear();
        self.handle.disconnect().await;
    }
}

struct Inner {
    connections: ConnectionManager,
    timings: CallTimings,
    presentation: Presentation,
    events: broadcast::Sender<SessionEvent>,
    selection: Mutex<Option<Scenario>>,
    profile: Mutex<UserProfile>,
    active: Mutex<Option<Arc<ActiveCall>>>,
    /// Set while `start_call` runs; cancelled by `leave`.
    pending_start: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct CallController {
    inner: Arc<Inner>,
}

impl CallController {
    pub fn new(connections: ConnectionManager, timings: CallTimings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connections,
                timings,
                presentation: Presentation::new(),
                events,
                selection: Mutex::new(None),
                profile: Mutex::new(UserProfile::default()),
                active: Mutex::new(None),
                pending_start: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn screen(&self) -> watch::Receiver<Screen> {
        self.inner.presentation.subscribe()
    }

    pub fn current_screen(&self) -> Screen {
        self.inner.presentation.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connections.current_state()
    }

    pub fn timings(&self) -> &CallTimings {
        &self.inner.timings
    }

    pub fn set_profile(&self, profile: UserProfile) {
        *lock(&self.inner.profile) = profile;
    }

    /// Picks the scenario for the next call. Only possible on the setup screen.
    pub fn select_scenario(&self, scenario: Scenario) -> Result<(), SessionError> {
        scenario.validate()?;
        if self.inner.presentation.kind() != ScreenKind::Setup || self.is_starting() {
            return Err(SessionError::CallInProgress);
        }
        info!(scenario = %scenario.id, skill = %scenario.skill, "Scenario selected");
        *lock(&self.inner.selection) = Some(scenario);
        Ok(())
    }

    pub fn selected_scenario(&self) -> Option<Scenario> {
        lock(&self.inner.selection).clone()
    }

    fn is_starting(&self) -> bool {
        lock(&self.inner.pending_start).is_some()
    }

    /// Starts a call with the selected scenario and returns once it is live.
    ///
    /// An opening with a stage direction first shows the roleplay intro. On a
    /// failure the flow stays at (or returns to) `Setup` with the selection
    /// kept, so the call can be started again.
    #[instrument(skip(self))]
    pub async fn start_call(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let scenario = lock(&inner.selection)
            .clone()
            .ok_or(SessionError::NoScenarioSelected)?;

        let start = CancellationToken::new();
        {
            let mut pending = lock(&inner.pending_start);
            if pending.is_some()
                || inner.presentation.kind() != ScreenKind::Setup
                || lock(&inner.active).is_some()
            {
                return Err(SessionError::CallInProgress);
            }
            *pending = Some(start.clone());
        }

        let result = Inner::start(inner, scenario, &start).await;
        lock(&inner.pending_start).take();
        result
    }

    /// Asks the agent for a hint. Available once the hint delay has passed.
    #[instrument(skip(self))]
    pub async fn request_hint(&self) -> Result<HintRecord, SessionError> {
        let call = self.active_call()?;
        if self.inner.presentation.kind() != ScreenKind::Live
            || !call.hint_available.load(Ordering::SeqCst)
        {
            return Err(SessionError::HintNotAvailable);
        }

        let hint = match call.bridge.request_hint().await {
            Ok(hint) => hint,
            Err(e) => {
                warn!(error = %e, "Hint request failed; keeping the previous hint");
                return Err(e);
            }
        };
        if call.cancel.is_cancelled() {
            return Err(SessionError::NoActiveCall);
        }
        lock(&call.state).hint = Some(hint.clone());
        let _ = self.inner.events.send(SessionEvent::Hint(hint.clone()));
        Ok(hint)
    }

    /// Runs the analysis loop for the live call. The agent triggers this with
    /// `end_conversation`; calling it again while it runs does nothing.
    pub async fn request_analysis(&self) -> Result<RetryOutcome, SessionError> {
        let call = self.active_call()?;
        Ok(Inner::analyze(&self.inner, &call).await)
    }

    /// Leaves the call from any screen but `Setup`. A running analysis is
    /// abandoned and its late result discarded.
    #[instrument(skip(self))]
    pub async fn leave(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let pending = lock(&inner.pending_start).clone();
        if let Some(start) = pending {
            info!("Leaving before the call started");
            start.cancel();
            let _ = inner
                .presentation
                .transition_from(ScreenKind::RoleplayIntro, Screen::Setup);
            return Ok(());
        }

        let call = lock(&inner.active).take().ok_or(SessionError::NoActiveCall)?;
        info!(session_id = %call.handle.id(), "Leaving call");
        call.close().await;
        if inner.presentation.kind() != ScreenKind::Setup {
            inner.presentation.transition(Screen::Setup)?;
        }
        Ok(())
    }

    /// "End Call" on the results screen: back to `Setup`, dropping the report,
    /// the hint and the goal progress of the finished call.
    pub async fn end_call(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        inner
            .presentation
            .transition_from(ScreenKind::AnalysisResults, Screen::Setup)?;
        let call = lock(&inner.active).take();
        if let Some(call) = call {
            call.close().await;
        }
        Ok(())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active_call().ok().map(|call| call.handle.id())
    }

    pub fn transcript(&self) -> Vec<TranscriptLine> {
        self.with_state(|state| state.transcript.clone())
            .unwrap_or_default()
    }

    pub fn goal_progress(&self) -> Option<GoalProgress> {
        self.with_state(|state| state.goal_progress.clone()).flatten()
    }

    pub fn hint(&self) -> Option<HintRecord> {
        self.with_state(|state| state.hint.clone()).flatten()
    }

    pub fn analysis(&self) -> Option<AnalysisResult> {
        self.with_state(|state| state.analysis.clone()).flatten()
    }

    pub fn closing_message(&self) -> Option<String> {
        self.with_state(|state| state.closing_message.clone())
            .flatten()
    }

    pub fn hint_available(&self) -> bool {
        self.active_call()
            .map(|call| call.hint_available.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn reactions(&self) -> Vec<TransientItem<String>> {
        self.active_call()
            .map(|call| call.reactions.items())
            .unwrap_or_default()
    }

    pub fn calls_to_action(&self) -> Vec<TransientItem<String>> {
        self.active_call()
            .map(|call| call.banners.items())
            .unwrap_or_default()
    }

    fn active_call(&self) -> Result<Arc<ActiveCall>, SessionError> {
        lock(&self.inner.active)
            .clone()
            .ok_or(SessionError::NoActiveCall)
    }

    fn with_state<R>(&self, f: impl FnOnce(&CallState) -> R) -> Option<R> {
        let call = self.active_call().ok()?;
        let state = lock(&call.state);
        Some(f(&state))
    }
}

impl Inner {
    async fn start(
        inner: &Arc<Inner>,
        scenario: Scenario,
        start: &CancellationToken,
    ) -> Result<(), SessionError> {
        let (stage_direction, _) = scenario.split_opening();
        if !stage_direction.is_empty() {
            inner.presentation.transition_from(
                ScreenKind::Setup,
                Screen::RoleplayIntro {
                    stage_direction: stage_direction.clone(),
                },
            )?;
            tokio::select! {
                _ = start.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(inner.timings.intro) => {}
            }
        }

        let profile = lock(&inner.profile).clone();
        let handle = match inner.connections.connect(&scenario, &profile).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = inner
                    .presentation
                    .transition_from(ScreenKind::RoleplayIntro, Screen::Setup);
                let event = match &e {
                    SessionError::Device(message) => SessionEvent::DeviceError {
                        message: message.clone(),
                    },
                    other => SessionEvent::ConnectionFailed {
                        reason: other.to_string(),
                    },
                };
                let _ = inner.events.send(event);
                return Err(e);
            }
        };

        if start.is_cancelled() {
            handle.disconnect().await;
            return Err(SessionError::Cancelled);
        }

        let call = Inner::activate(inner, handle);
        if let Err(e) = inner.presentation.transition(Screen::Live) {
            lock(&inner.active).take();
            call.close().await;
            return Err(e);
        }
        info!(session_id = %call.handle.id(), scenario = %scenario.id, "Call is live");
        Inner::spawn_live_timers(inner, &call, stage_direction);
        Ok(())
    }

    fn activate(inner: &Arc<Inner>, handle: SessionHandle) -> Arc<ActiveCall> {
        let timings = &inner.timings;
        let cancel = CancellationToken::new();
        let room_events = handle.take_events();
        let bridge = Arc::new(RpcBridge::new(
            Arc::clone(handle.room()),
            timings.rpc_timeout,
        ));

        let reaction_events = inner.events.clone();
        let reactions = TransientFeed::new(timings.reaction_lifetime, cancel.clone()).on_expire(
            move |id| {
                let _ = reaction_events.send(SessionEvent::ReactionExpired { id });
            },
        );
        let banner_events = inner.events.clone();
        let banners = TransientFeed::new(timings.call_to_action_lifetime, cancel.clone())
            .on_expire(move |id| {
                let _ = banner_events.send(SessionEvent::CallToActionExpired { id });
            });

        let call = Arc::new(ActiveCall {
            handle,
            bridge: Arc::clone(&bridge),
            subscription: Mutex::new(None),
            cancel,
            state: Mutex::new(CallState::default()),
            reactions,
            banners,
            retry: AnalysisRetryLoop::new(
                timings.analysis_max_attempts,
                timings.analysis_retry_delay,
            ),
            hint_available: AtomicBool::new(false),
        });

        let hooks = Arc::new(CallHooks {
            controller: Arc::downgrade(inner),
            call: Arc::downgrade(&call),
        });
        *lock(&call.subscription) = Some(bridge.subscribe(hooks));
        *lock(&inner.active) = Some(Arc::clone(&call));

        if let Some(room_events) = room_events {
            tokio::spawn(forward_room_events(
                Arc::downgrade(inner),
                Arc::clone(&call),
                room_events,
            ));
        }
        call
    }

    /// Hint reveal and the stage direction line, both relative to entering `Live`.
    fn spawn_live_timers(inner: &Arc<Inner>, call: &Arc<ActiveCall>, stage_direction: String) {
        let hint_call = Arc::clone(call);
        let hint_events = inner.events.clone();
        let hint_delay = inner.timings.hint_reveal;
        tokio::spawn(async move {
            tokio::select! {
                _ = hint_call.cancel.cancelled() => {}
                _ = tokio::time::sleep(hint_delay) => {
                    hint_call.hint_available.store(true, Ordering::SeqCst);
                    let _ = hint_events.send(SessionEvent::HintAvailable);
                }
            }
        });

        if stage_direction.is_empty() {
            return;
        }
        let stage_call = Arc::clone(call);
        let stage_events = inner.events.clone();
        let stage_delay = inner.timings.stage_direction_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = stage_call.cancel.cancelled() => {}
                _ = tokio::time::sleep(stage_delay) => {
                    let line = TranscriptLine {
                        source: TranscriptSource::StageDirection,
                        text: stage_direction,
                        is_final: true,
                    };
                    lock(&stage_call.state).transcript.push(line.clone());
                    let _ = stage_events.send(SessionEvent::Transcript(line));
                }
            }
        });
    }

    #[instrument(skip_all, fields(session_id = %call.handle.id()))]
    async fn analyze(inner: &Arc<Inner>, call: &Arc<ActiveCall>) -> RetryOutcome {
        if lock(&call.state).analysis.is_some() {
            debug!("Analysis already received for this call");
            return RetryOutcome::AlreadyRunning;
        }

        let max_attempts = call.retry.max_attempts();
        let on_attempt = |attempt: u32| {
            let screen = Screen::AnalysisPreparing {
                attempt,
                max_attempts,
            };
            if inner.presentation.transition(screen).is_ok() {
                let _ = inner.events.send(SessionEvent::AnalysisAttempt {
                    attempt,
                    max_attempts,
                });
            }
        };
        let outcome = call
            .retry
            .run(call.bridge.as_ref(), &call.cancel, &on_attempt)
            .await;

        match &outcome {
            RetryOutcome::Succeeded { result, attempts } => {
                info!(attempts, grade = %result.overall_score, "Analysis ready");
                lock(&call.state).analysis = Some(result.clone());
                let report = Box::new(result.clone());
                if let Err(e) = inner
                    .presentation
                    .transition(Screen::AnalysisResults(report.clone()))
                {
                    warn!(error = %e, "Analysis arrived outside the preparing screen");
                }
                let _ = inner.events.send(SessionEvent::AnalysisReady(report));
                call.close().await;
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(attempts, error = %last_error, "Giving up on analysis");
                call.close().await;
                inner.discard(call);
                let _ = inner.presentation.transition(Screen::Setup);
                let _ = inner.events.send(SessionEvent::AnalysisFailed {
                    attempts: *attempts,
                    reason: last_error.to_string(),
                });
            }
            RetryOutcome::Cancelled | RetryOutcome::AlreadyRunning => {}
        }
        outcome
    }

    /// Forgets `call` if it is still the active one.
    fn discard(&self, call: &Arc<ActiveCall>) -> bool {
        let mut active = lock(&self.active);
        match active.as_ref() {
            Some(current) if Arc::ptr_eq(current, call) => {
                active.take();
                true
            }
            _ => false,
        }
    }
}

/// Applies inbound agent calls to the call they were registered for.
struct CallHooks {
    controller: Weak<Inner>,
    call: Weak<ActiveCall>,
}

impl CallHooks {
    fn upgrade(&self) -> Option<(Arc<Inner>, Arc<ActiveCall>)> {
        let inner = self.controller.upgrade()?;
        let call = self.call.upgrade()?;
        if call.cancel.is_cancelled() {
            return None;
        }
        Some((inner, call))
    }
}

impl BridgeHandler for CallHooks {
    fn goal_progress(&self, progress: GoalProgress) {
        let Some((inner, call)) = self.upgrade() else {
            return;
        };
        let progress = {
            let mut state = lock(&call.state);
            let progress = progress.following(state.goal_progress.as_ref());
            state.goal_progress = Some(progress.clone());
            progress
        };
        if let Some(text) = progress.call_to_action() {
            let id = call.banners.push(text.to_string());
            let _ = inner.events.send(SessionEvent::CallToAction {
                id,
                text: text.to_string(),
            });
        }
        let _ = inner.events.send(SessionEvent::GoalProgress(progress));
    }

    fn reaction(&self, token: String) {
        let Some((inner, call)) = self.upgrade() else {
            return;
        };
        let id = call.reactions.push(token.clone());
        let _ = inner.events.send(SessionEvent::Reaction { id, token });
    }

    fn conversation_ended(&self, message: String) {
        let Some((inner, call)) = self.upgrade() else {
            return;
        };
        lock(&call.state).closing_message = Some(message.clone());
        let _ = inner.events.send(SessionEvent::ConversationEnded { message });
        tokio::spawn(async move {
            Inner::analyze(&inner, &call).await;
        });
    }
}

async fn forward_room_events(
    controller: Weak<Inner>,
    call: Arc<ActiveCall>,
    mut events: broadcast::Receiver<RoomEvent>,
) {
    let local = call.handle.room().local_identity();
    loop {
        let event = tokio::select! {
            _ = call.cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = controller.upgrade() else {
            break;
        };
        match event {
            Ok(RoomEvent::Transcription {
                participant_identity,
                text,
                is_final,
            }) => {
                let source = if local.as_deref() == Some(participant_identity.as_str()) {
                    TranscriptSource::Local
                } else {
                    TranscriptSource::Remote(participant_identity)
                };
                let line = TranscriptLine {
                    source,
                    text,
                    is_final,
                };
                if is_final {
                    lock(&call.state).transcript.push(line.clone());
                }
                let _ = inner.events.send(SessionEvent::Transcript(line));
            }
            Ok(RoomEvent::MediaDeviceError { message }) => {
                warn!(%message, "Media device failed during the call");
                let _ = inner.events.send(SessionEvent::DeviceError { message });
            }
            Ok(RoomEvent::Disconnected { reason }) => {
                warn!(%reason, "Room closed during the call");
                let _ = inner
                    .events
                    .send(SessionEvent::Disconnected { reason });
                if inner.presentation.kind() == ScreenKind::Live && inner.discard(&call) {
                    call.close().await;
                    let _ = inner
                        .presentation
                        .transition_from(ScreenKind::Live, Screen::Setup);
                }
                break;
            }
            Ok(RoomEvent::ParticipantLeft { identity }) => {
                info!(%identity, "Participant left");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Dropped room events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
