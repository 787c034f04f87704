//! Speech dispatch integration tests
//!
//! Run with: cargo test --test speech_dispatch_test

mod harness;

use harness::{ApiCall, TestRig};
use remotemedia_avatar_session::{Error, SessionState, SpeechDispatcher};
use std::time::Duration;
use tokio::time::Instant;

async fn connected_rig() -> TestRig {
    let rig = TestRig::new();
    rig.controller.start().await.unwrap();
    rig.controller
        .wait_for_state(SessionState::Connected, Duration::from_secs(2))
        .await
        .unwrap();
    rig
}

#[tokio::test]
async fn test_speak_requires_connected_session() {
    let rig = TestRig::manual();
    let speech = SpeechDispatcher::new(&rig.controller);

    let idle = speech.speak("hello").await.unwrap_err();
    assert!(matches!(idle, Error::SessionNotActive(_)));

    rig.controller.start().await.unwrap();
    let negotiating = speech.speak("hello").await.unwrap_err();
    assert!(matches!(negotiating, Error::SessionNotActive(_)));

    assert!(!rig
        .api
        .calls()
        .iter()
        .any(|c| matches!(c, ApiCall::Speak { .. })));
}

#[tokio::test]
async fn test_speak_returns_reported_duration() {
    let rig = connected_rig().await;
    rig.api.set_speech_duration(Some(2500));
    let speech = SpeechDispatcher::new(&rig.controller);

    let task = speech.speak("Welcome to the practice session.").await.unwrap();

    assert_eq!(task.session_id, "session-1");
    assert_eq!(task.duration, Duration::from_millis(2500));
    assert!(task.duration_reported);
    assert!(rig.api.calls().contains(&ApiCall::Speak {
        session_id: "session-1".to_string(),
        text: "Welcome to the practice session.".to_string(),
    }));
}

#[tokio::test]
async fn test_missing_duration_falls_back_to_one_second() {
    let rig = connected_rig().await;
    rig.api.set_speech_duration(None);
    let speech = SpeechDispatcher::new(&rig.controller);

    let task = speech.speak("Hmm.").await.unwrap();

    assert_eq!(task.duration_ms(), 1000);
    assert!(!task.duration_reported);
}

#[tokio::test]
async fn test_speech_failure_leaves_session_running() {
    let rig = connected_rig().await;
    rig.api.fail_speech(Some(500));
    let speech = SpeechDispatcher::new(&rig.controller);

    let err = speech.speak("hello").await.unwrap_err();

    assert!(err.is_remote_service());
    assert_eq!(rig.controller.state(), SessionState::Connected);
    assert!(rig.api.stops().is_empty());

    rig.api.fail_speech(None);
    assert!(speech.speak("hello again").await.is_ok());
}

#[tokio::test]
async fn test_speech_is_sent_one_at_a_time() {
    let rig = connected_rig().await;
    let speech = SpeechDispatcher::new(&rig.controller);

    let (a, b) = tokio::join!(speech.speak("first"), speech.speak("second"));
    a.unwrap();
    b.unwrap();

    let spoken: Vec<String> = rig
        .api
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ApiCall::Speak { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(spoken, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_conclude_waits_for_duration_then_stops() {
    let rig = connected_rig().await;
    rig.api.set_speech_duration(Some(1500));
    let speech = SpeechDispatcher::new(&rig.controller);

    let started = Instant::now();
    let task = speech.conclude("That's all for today.").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(task.session_id, "session-1");
    assert_eq!(rig.controller.state(), SessionState::Closed);
    assert_eq!(rig.api.stops(), vec!["session-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_conclude_leaves_replacement_session_alone() {
    let rig = connected_rig().await;
    rig.api.set_speech_duration(Some(1000));
    let speech = SpeechDispatcher::new(&rig.controller);

    let restart = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        rig.controller.start().await
    };
    let (concluded, restarted) = tokio::join!(speech.conclude("Goodbye."), restart);
    concluded.unwrap();
    restarted.unwrap();

    assert_eq!(rig.api.stops(), vec!["session-1".to_string()]);
    assert_eq!(
        rig.controller.session().unwrap().session_id.as_deref(),
        Some("session-2")
    );
}

#[tokio::test]
async fn test_conclude_stops_even_when_speech_fails() {
    let rig = connected_rig().await;
    rig.api.fail_speech(Some(503));
    let speech = SpeechDispatcher::new(&rig.controller);

    assert!(speech.conclude("Goodbye.").await.is_err());
    assert_eq!(rig.controller.state(), SessionState::Closed);
    assert_eq!(rig.api.stops(), vec!["session-1".to_string()]);
}

#[tokio::test]
async fn test_dispatcher_outliving_controller() {
    let rig = TestRig::new();
    let speech = SpeechDispatcher::new(&rig.controller);
    drop(rig);

    let err = speech.speak("anyone there?").await.unwrap_err();
    assert!(matches!(err, Error::SessionNotActive(_)));
}
