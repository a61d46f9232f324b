use async_trait::async_trait;
use kiyomi_core::{ConnectionDetails, Gender, Scenario, UserProfile};
use kiyomi_realtime::{
    LoopbackHub, LoopbackRoom, PerformRpcParams, RealtimeRoom, RpcError, rpc_handler,
};
use kiyomi_session::{
    CallController, CallTimings, ConnectionManager, ConnectionState, RetryOutcome, Screen,
    SessionError, SessionEvent, TokenIssuer, TranscriptLine, TranscriptSource,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const REPORT: &str = r#"{
    "complete_score": "C+",
    "radar_diagram": {
        "impact": {"score": 7, "insight": "Clear ask"},
        "rapport": {"score": 8, "insight": "Warm tone"},
        "flex": {"score": 6, "insight": "Held position"},
        "frame": {"score": 7, "insight": "Framed around value"},
        "timing": {"score": 5, "insight": "Rushed the close"}
    },
    "feedback": ["Pause after naming your number"],
    "overall_message": "Good negotiation instincts."
}"#;

struct FixedIssuer;

#[async_trait]
impl TokenIssuer for FixedIssuer {
    async fn issue(
        &self,
        scenario: &Scenario,
        profile: &UserProfile,
    ) -> anyhow::Result<ConnectionDetails> {
        Ok(ConnectionDetails {
            server_url: "loopback://practice".to_string(),
            room_name: format!("practice_{}", scenario.id),
            participant_name: profile.name.clone(),
            participant_token: "user-token".to_string(),
        })
    }
}

struct Harness {
    controller: CallController,
    user: Arc<LoopbackRoom>,
    agent: Arc<LoopbackRoom>,
    events: broadcast::Receiver<SessionEvent>,
}

async fn harness() -> Harness {
    let hub = LoopbackHub::new();
    let agent = Arc::new(hub.room("agent"));
    agent
        .connect("loopback://practice", "agent-token")
        .await
        .unwrap();
    let user = Arc::new(hub.room("user"));
    let factory_room = Arc::clone(&user);
    let manager = ConnectionManager::new(
        Arc::new(FixedIssuer),
        Arc::new(move || factory_room.clone() as Arc<dyn RealtimeRoom>),
    );
    let controller = CallController::new(manager, CallTimings::default());
    controller.set_profile(UserProfile::new("Sam", Gender::Female));
    let events = controller.subscribe();
    Harness {
        controller,
        user,
        agent,
        events,
    }
}

fn scenario_with_intro() -> Scenario {
    Scenario::parse(
        r#"{"id":"raise","skill":"negotiation","goal":"Get a 10% raise",
            "opening":"*She looks up from her laptop* You wanted to see me?"}"#,
    )
    .unwrap()
}

fn plain_scenario() -> Scenario {
    Scenario::parse(
        r#"{"id":"coffee","skill":"smalltalk","goal":"Learn their name",
            "opening":"Busy morning, huh?"}"#,
    )
    .unwrap()
}

async fn agent_calls(agent: &LoopbackRoom, method: &str, payload: &str) -> Result<String, RpcError> {
    agent
        .perform_rpc(PerformRpcParams::new("user", method, payload))
        .await
}

async fn next_matching(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

async fn start_live(h: &Harness, scenario: Scenario) {
    h.controller.select_scenario(scenario).unwrap();
    h.controller.start_call().await.unwrap();
    assert_eq!(h.controller.current_screen(), Screen::Live);
}

#[tokio::test(start_paused = true)]
async fn test_roleplay_intro_then_live_with_stage_direction() {
    let h = harness().await;
    h.controller.select_scenario(scenario_with_intro()).unwrap();

    let started = Instant::now();
    let task = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_call().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        h.controller.current_screen(),
        Screen::RoleplayIntro {
            stage_direction: "*She looks up from her laptop*".to_string()
        }
    );
    assert!(!h.user.is_connected());

    task.await.unwrap().unwrap();
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5_100));
    assert_eq!(h.controller.current_screen(), Screen::Live);
    assert_eq!(h.controller.connection_state(), ConnectionState::Connected);
    assert_eq!(
        h.user.connected_with(),
        Some(("loopback://practice".to_string(), "user-token".to_string()))
    );
    assert!(h.controller.transcript().is_empty());

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(h.controller.transcript().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        h.controller.transcript(),
        vec![TranscriptLine {
            source: TranscriptSource::StageDirection,
            text: "*She looks up from her laptop*".to_string(),
            is_final: true,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_opening_without_stage_direction_goes_straight_live() {
    let mut h = harness().await;
    start_live(&h, plain_scenario()).await;

    h.agent.publish_transcription("Busy morning, huh?", true);
    h.agent.publish_transcription("Busy", false);
    let line = next_matching(&mut h.events, |e| matches!(e, SessionEvent::Transcript(_))).await;
    assert_eq!(
        line,
        SessionEvent::Transcript(TranscriptLine {
            source: TranscriptSource::Remote("agent".to_string()),
            text: "Busy morning, huh?".to_string(),
            is_final: true,
        })
    );
    next_matching(&mut h.events, |e| matches!(e, SessionEvent::Transcript(l) if !l.is_final)).await;
    assert_eq!(h.controller.transcript().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hint_revealed_after_delay() {
    let mut h = harness().await;
    h.agent.register_rpc_method(
        "hint",
        rpc_handler(|_| async {
            Ok(r#"{"hint":"Ask about their weekend","category":"rapport"}"#.to_string())
        }),
    );
    start_live(&h, plain_scenario()).await;

    assert!(matches!(
        h.controller.request_hint().await,
        Err(SessionError::HintNotAvailable)
    ));
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(!h.controller.hint_available());

    next_matching(&mut h.events, |e| *e == SessionEvent::HintAvailable).await;
    let hint = h.controller.request_hint().await.unwrap();
    assert_eq!(hint.category, "rapport");
    assert_eq!(h.controller.hint(), Some(hint.clone()));

    h.agent
        .register_rpc_method("hint", rpc_handler(|_| async { Ok("not a hint".to_string()) }));
    assert!(matches!(
        h.controller.request_hint().await,
        Err(SessionError::Parse(_))
    ));
    assert_eq!(h.controller.hint(), Some(hint));
}

#[tokio::test(start_paused = true)]
async fn test_goal_progress_keeps_previous_and_current() {
    let mut h = harness().await;
    start_live(&h, plain_scenario()).await;

    let first = agent_calls(
        &h.agent,
        "checker",
        r#"{"is_goal_complete":false,"progress_towards_goal":7,"is_bad_ending_triggered":false}"#,
    )
    .await
    .unwrap();
    assert_eq!(first, "ok");
    agent_calls(
        &h.agent,
        "checker",
        r#"{"is_goal_complete":false,"progress_towards_goal":4,"previous_progress_towards_goal":2,"is_bad_ending_triggered":false,"CTA":"Slow down and listen"}"#,
    )
    .await
    .unwrap();

    let progress = h.controller.goal_progress().unwrap();
    assert_eq!(progress.previous_progress_towards_goal, Some(7.0));
    assert_eq!(progress.progress_towards_goal, 4.0);
    assert!(!progress.improved());

    let banner = next_matching(&mut h.events, |e| matches!(e, SessionEvent::CallToAction { .. })).await;
    let SessionEvent::CallToAction { id, text } = banner else {
        unreachable!()
    };
    assert_eq!(text, "Slow down and listen");
    assert_eq!(h.controller.calls_to_action().len(), 1);

    next_matching(&mut h.events, |e| *e == SessionEvent::CallToActionExpired { id }).await;
    assert!(h.controller.calls_to_action().is_empty());

    let rejected = agent_calls(&h.agent, "checker", "{").await.unwrap();
    assert!(rejected.starts_with("error"));
    assert_eq!(h.controller.goal_progress().unwrap().progress_towards_goal, 4.0);
}

#[tokio::test(start_paused = true)]
async fn test_reactions_expire_by_identity() {
    let h = harness().await;
    start_live(&h, plain_scenario()).await;

    agent_calls(&h.agent, "reaction", "🎉").await.unwrap();
    let party = h.controller.reactions();
    assert_eq!(party.len(), 1);
    assert_eq!(party[0].value, "🎉");

    tokio::time::sleep(Duration::from_secs(1)).await;
    agent_calls(&h.agent, "reaction", "👏").await.unwrap();
    assert_eq!(h.controller.reactions().len(), 2);

    tokio::time::sleep(Duration::from_millis(2_050)).await;
    let remaining = h.controller.reactions();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].value, "👏");
    assert_ne!(remaining[0].id, party[0].id);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.controller.reactions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_analysis_succeeds_on_second_attempt() {
    let mut h = harness().await;
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    h.agent.register_rpc_method(
        "postanalyzer",
        rpc_handler(move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    Err(RpcError::application("transcript still processing"))
                } else {
                    Ok(REPORT.to_string())
                }
            }
        }),
    );
    start_live(&h, plain_scenario()).await;

    let ack = agent_calls(
        &h.agent,
        "end_conversation",
        r#"{"message":"Congratulations! You have successfully completed the goal."}"#,
    )
    .await
    .unwrap();
    assert_eq!(ack, "ok");

    let ready = next_matching(&mut h.events, |e| matches!(e, SessionEvent::AnalysisReady(_))).await;
    let SessionEvent::AnalysisReady(report) = ready else {
        unreachable!()
    };
    assert_eq!(report.overall_score, "C+");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.controller.current_screen(), Screen::AnalysisResults(report));
    assert_eq!(
        h.controller.closing_message().as_deref(),
        Some("Congratulations! You have successfully completed the goal.")
    );
    assert!(!h.user.is_connected());
    assert!(h.user.registered_methods().is_empty());

    h.controller.end_call().await.unwrap();
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert!(h.controller.analysis().is_none());
    assert!(h.controller.goal_progress().is_none());
    assert!(h.controller.hint().is_none());
    assert_eq!(h.controller.selected_scenario().unwrap().id, "coffee");
}

#[tokio::test(start_paused = true)]
async fn test_analysis_exhaustion_returns_to_setup() {
    let mut h = harness().await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    h.agent.register_rpc_method(
        "postanalyzer",
        rpc_handler(move |_| {
            recorded.lock().unwrap().push(Instant::now());
            async { Ok("not a report".to_string()) }
        }),
    );
    start_live(&h, plain_scenario()).await;

    agent_calls(&h.agent, "end_conversation", r#"{"message":"Next time you'll do better!"}"#)
        .await
        .unwrap();

    let attempt = next_matching(&mut h.events, |e| matches!(e, SessionEvent::AnalysisAttempt { .. })).await;
    assert_eq!(
        attempt,
        SessionEvent::AnalysisAttempt {
            attempt: 1,
            max_attempts: 3
        }
    );
    let failed = next_matching(&mut h.events, |e| matches!(e, SessionEvent::AnalysisFailed { .. })).await;
    assert!(matches!(failed, SessionEvent::AnalysisFailed { attempts: 3, .. }));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(2));
    }
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert!(!h.user.is_connected());
    assert!(h.controller.session_id().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_end_conversation_runs_one_loop() {
    let h = harness().await;
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    h.agent.register_rpc_method(
        "postanalyzer",
        rpc_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(REPORT.to_string())
            }
        }),
    );
    start_live(&h, plain_scenario()).await;

    agent_calls(&h.agent, "end_conversation", "\"done\"").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    agent_calls(&h.agent, "end_conversation", "\"done again\"").await.unwrap();
    assert!(matches!(
        h.controller.request_analysis().await.unwrap(),
        RetryOutcome::AlreadyRunning
    ));
    assert_eq!(
        h.controller.current_screen(),
        Screen::AnalysisPreparing {
            attempt: 1,
            max_attempts: 3
        }
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(h.controller.current_screen(), Screen::AnalysisResults(_)));
}

#[tokio::test(start_paused = true)]
async fn test_leaving_during_analysis_discards_late_result() {
    let mut h = harness().await;
    h.agent.register_rpc_method(
        "postanalyzer",
        rpc_handler(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(REPORT.to_string())
        }),
    );
    start_live(&h, plain_scenario()).await;

    agent_calls(&h.agent, "end_conversation", "{}").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(matches!(
        h.controller.current_screen(),
        Screen::AnalysisPreparing { attempt: 1, .. }
    ));

    h.controller.leave().await.unwrap();
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert!(h.user.registered_methods().is_empty());
    assert!(!h.user.is_connected());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert!(h.controller.analysis().is_none());
    while let Ok(event) = h.events.try_recv() {
        assert!(!matches!(event, SessionEvent::AnalysisReady(_)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_device_error_keeps_selection_for_retry() {
    let mut h = harness().await;
    h.user.set_microphone_available(false);
    h.controller.select_scenario(scenario_with_intro()).unwrap();

    let err = h.controller.start_call().await.unwrap_err();
    assert!(matches!(err, SessionError::Device(_)));
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert_eq!(h.controller.selected_scenario().unwrap().id, "raise");
    assert!(!h.user.is_connected());
    next_matching(&mut h.events, |e| matches!(e, SessionEvent::DeviceError { .. })).await;

    h.user.set_microphone_available(true);
    h.controller.start_call().await.unwrap();
    assert_eq!(h.controller.current_screen(), Screen::Live);
    assert!(h.user.microphone_enabled());
}

#[tokio::test(start_paused = true)]
async fn test_leave_during_intro_never_connects() {
    let h = harness().await;
    h.controller.select_scenario(scenario_with_intro()).unwrap();
    let task = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_call().await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;

    h.controller.leave().await.unwrap();
    assert!(matches!(task.await.unwrap(), Err(SessionError::Cancelled)));
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert!(h.user.connected_with().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_remote_disconnect_returns_to_setup() {
    let mut h = harness().await;
    start_live(&h, plain_scenario()).await;

    h.user.disconnect().await;
    next_matching(&mut h.events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.controller.current_screen(), Screen::Setup);
    assert!(h.controller.session_id().is_none());
    assert!(matches!(
        h.controller.select_scenario(plain_scenario()),
        Ok(())
    ));
}
