// Integration tests for the session state machine
//
// The session runs against in-memory devices and an in-memory live link so
// each lifecycle path can be driven from the service side.

mod common;

use anyhow::Result;
use common::{eventually, FakeConnector, HangingConnector, TestDevices};
use loqa_live::audio::AudioFrame;
use loqa_live::live::ClientMessage;
use loqa_live::{
    ConnectionState, DeviceStateStore, LiveSession, LogEntry, Role, SessionConfig, SessionError,
    ToolDispatcher,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> SessionConfig {
    SessionConfig {
        frame_size: 4,
        ..SessionConfig::default()
    }
}

fn session_with(devices: Arc<TestDevices>, connector: Arc<FakeConnector>) -> LiveSession {
    let dispatcher = Arc::new(ToolDispatcher::new(DeviceStateStore::default(), None));
    LiveSession::new(test_config(), devices, connector, dispatcher)
}

fn stalled_session(config: SessionConfig) -> (LiveSession, Arc<HangingConnector>) {
    let connector = HangingConnector::new();
    let dispatcher = Arc::new(ToolDispatcher::new(DeviceStateStore::default(), None));
    let session = LiveSession::new(config, TestDevices::available(), connector.clone(), dispatcher);
    (session, connector)
}

/// Wait (on the session's own clock) until the state is `expected`
async fn wait_for_state(session: &LiveSession, expected: ConnectionState) -> bool {
    let mut status = session.subscribe_status();
    let reached = async {
        while status.borrow_and_update().state != expected {
            if status.changed().await.is_err() {
                return false;
            }
        }
        true
    };
    tokio::time::timeout(Duration::from_secs(60), reached)
        .await
        .unwrap_or(false)
}

fn error_entries(entries: &[LogEntry]) -> usize {
    entries
        .iter()
        .filter(|e| e.role == Role::System && e.text.starts_with("Error:"))
        .count()
}

#[tokio::test]
async fn test_microphone_denied_never_touches_network() {
    let (connector, _ends) = FakeConnector::new();
    let session = session_with(TestDevices::without_microphone(), connector.clone());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, SessionError::Microphone(_)));
    assert_eq!(session.state(), ConnectionState::Error);
    assert!(session.error_message().unwrap().contains("microphone"));
    assert_eq!(connector.attempts(), 0);
    assert_eq!(error_entries(&session.log().entries()), 1);
}

#[tokio::test]
async fn test_output_failure_reports_error() {
    let (connector, _ends) = FakeConnector::new();
    let devices = TestDevices::without_speaker();
    let session = session_with(devices.clone(), connector.clone());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, SessionError::Output(_)));
    assert_eq!(session.state(), ConnectionState::Error);
    assert_eq!(connector.attempts(), 0);
    assert_eq!(error_entries(&session.log().entries()), 1);
}

#[tokio::test]
async fn test_transport_open_failure_reports_error() {
    let connector = FakeConnector::refusing();
    let session = session_with(TestDevices::available(), connector.clone());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(session.state(), ConnectionState::Error);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.volume(), 0.0);
}

#[tokio::test]
async fn test_disconnect_cancels_a_stalled_connect() -> Result<()> {
    let (session, connector) = stalled_session(test_config());

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    assert!(eventually(|| connector.attempts() == 1).await);
    assert_eq!(session.state(), ConnectionState::Connecting);

    tokio::time::timeout(Duration::from_secs(3), session.disconnect())
        .await
        .expect("disconnect should not wait for the stalled link");
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // The abandoned attempt winds down quietly
    assert_eq!(connecting.await?, Ok(()));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(error_entries(&session.log().entries()), 0);

    // A fresh attempt is allowed afterwards
    let retry = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    assert!(eventually(|| connector.attempts() == 2).await);
    session.disconnect().await;
    assert_eq!(retry.await?, Ok(()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stalled_link_open_times_out() {
    let (session, _connector) = stalled_session(SessionConfig {
        connect_timeout: Duration::from_secs(2),
        ..test_config()
    });

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(session.state(), ConnectionState::Error);
    assert_eq!(error_entries(&session.log().entries()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_setup_ends_in_error() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let dispatcher = Arc::new(ToolDispatcher::new(DeviceStateStore::default(), None));
    let config = SessionConfig {
        setup_timeout: Duration::from_secs(5),
        ..test_config()
    };
    let session = LiveSession::new(config, TestDevices::available(), connector, dispatcher);

    session.connect().await?;
    let _service = ends.recv().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connecting);

    assert!(wait_for_state(&session, ConnectionState::Error).await);
    assert_eq!(
        session.error_message().as_deref(),
        Some("Connection error: setup not acknowledged")
    );
    assert_eq!(error_entries(&session.log().entries()), 1);
    Ok(())
}

#[tokio::test]
async fn test_connects_once_setup_is_acknowledged() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector);

    session.connect().await?;
    assert_eq!(session.state(), ConnectionState::Connecting);

    let mut service = ends.recv().await.unwrap();
    let setup = service.next_non_audio().await;
    assert!(matches!(setup, ClientMessage::Setup(_)));

    service.setup_complete().await;
    assert!(eventually(|| session.state() == ConnectionState::Connected).await);
    assert!(session.status().session_id.is_some());

    let texts: Vec<String> = session.log().entries().into_iter().map(|e| e.text).collect();
    assert!(texts.iter().any(|t| t.starts_with("Connecting to")));
    assert!(texts.iter().any(|t| t == "Link established"));

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_second_connect_is_a_no_op() -> Result<()> {
    let (connector, _ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector.clone());

    session.connect().await?;
    session.connect().await?;

    assert_eq!(connector.attempts(), 1);
    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_remote_close_returns_to_disconnected() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector);

    session.connect().await?;
    let service = ends.recv().await.unwrap();
    service.setup_complete().await;
    assert!(eventually(|| session.state() == ConnectionState::Connected).await);

    service
        .to_client
        .send(loqa_live::live::LinkEvent::Closed(Some("server shutdown".into())))
        .await?;

    assert!(eventually(|| session.state() == ConnectionState::Disconnected).await);
    assert!(session
        .log()
        .entries()
        .iter()
        .any(|e| e.text == "Link terminated: server shutdown"));
    assert_eq!(session.volume(), 0.0);
    Ok(())
}

#[tokio::test]
async fn test_transport_error_enters_error_state() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector);

    session.connect().await?;
    let service = ends.recv().await.unwrap();
    service
        .to_client
        .send(loqa_live::live::LinkEvent::Error("connection reset".into()))
        .await?;

    assert!(eventually(|| session.state() == ConnectionState::Error).await);
    assert!(session.error_message().unwrap().contains("connection reset"));
    assert_eq!(error_entries(&session.log().entries()), 1);

    // Error allows a fresh attempt
    session.connect().await?;
    assert_eq!(session.state(), ConnectionState::Connecting);
    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_lost_microphone_ends_session_with_error() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let devices = TestDevices::available();
    let session = session_with(devices.clone(), connector);

    session.connect().await?;
    let service = ends.recv().await.unwrap();
    service.setup_complete().await;
    assert!(eventually(|| session.state() == ConnectionState::Connected).await);

    devices.unplug_microphone();

    assert!(eventually(|| session.state() == ConnectionState::Error).await);
    assert_eq!(error_entries(&session.log().entries()), 1);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_is_idempotent() -> Result<()> {
    let (connector, _ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector);

    // Nothing to do yet
    session.disconnect().await;
    assert!(session.log().is_empty());

    session.connect().await?;
    session.disconnect().await;
    let after_first = session.log().len();
    session.disconnect().await;

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.log().len(), after_first);
    assert_eq!(session.volume(), 0.0);
    Ok(())
}

#[tokio::test]
async fn test_audio_flows_after_handshake_and_volume_tracks_input() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let devices = TestDevices::available();
    let session = session_with(devices.clone(), connector);

    session.connect().await?;
    let mut service = ends.recv().await.unwrap();
    assert!(matches!(service.from_client.recv().await, Some(ClientMessage::Setup(_))));

    let feed = devices.microphone_feed().unwrap();
    feed.send(AudioFrame {
        samples: vec![0.1, -0.1, 0.1, -0.1],
        sample_rate: 16000,
        timestamp_ms: 0,
    })
    .await?;

    // Volume updates even before the link is ready
    assert!(eventually(|| (session.volume() - 0.5).abs() < 1e-3).await);

    service.setup_complete().await;
    let audio = tokio::time::timeout(std::time::Duration::from_secs(5), service.from_client.recv())
        .await?
        .unwrap();

    let input = match audio {
        ClientMessage::RealtimeInput(input) => input,
        other => panic!("expected realtime input, got {other:?}"),
    };
    assert_eq!(input.media_chunks[0].mime_type, "audio/pcm;rate=16000");

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_tool_call_round_trip_over_link() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector);

    session.connect().await?;
    let mut service = ends.recv().await.unwrap();
    service.setup_complete().await;

    service
        .send(json!({
            "toolCall": {
                "functionCalls": [
                    { "id": "c1", "name": "toggleFlashlight", "args": { "state": true } }
                ]
            }
        }))
        .await;

    // Setup first, then the tool response
    assert!(matches!(service.next_non_audio().await, ClientMessage::Setup(_)));
    let ClientMessage::ToolResponse(response) = service.next_non_audio().await else {
        panic!("expected tool response");
    };

    assert_eq!(response.function_responses.len(), 1);
    assert_eq!(response.function_responses[0].id, "c1");
    assert_eq!(
        response.function_responses[0].response,
        json!({ "status": "Flashlight turned ON" })
    );
    assert!(session.device_state().snapshot().flashlight);

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_transcripts_are_logged_on_turn_complete() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let session = session_with(TestDevices::available(), connector);

    session.connect().await?;
    let service = ends.recv().await.unwrap();
    service.setup_complete().await;

    service
        .send(json!({ "serverContent": { "inputTranscription": { "text": "turn on " } } }))
        .await;
    service
        .send(json!({ "serverContent": { "inputTranscription": { "text": "the light" } } }))
        .await;
    service
        .send(json!({ "serverContent": { "outputTranscription": { "text": "Done." } } }))
        .await;
    service
        .send(json!({ "serverContent": { "turnComplete": true } }))
        .await;

    assert!(eventually(|| session.log().entries().iter().any(|e| e.role == Role::Model)).await);

    let turns: Vec<(Role, String)> = session
        .log()
        .entries()
        .into_iter()
        .filter(|e| e.role != Role::System)
        .map(|e| (e.role, e.text))
        .collect();
    assert_eq!(
        turns,
        vec![
            (Role::User, "turn on the light".to_string()),
            (Role::Model, "Done.".to_string()),
        ]
    );

    session.disconnect().await;
    Ok(())
}
