// Integration tests for the live wire format and the handshake-gated transport

mod common;

use anyhow::Result;
use base64::Engine;
use common::FakeConnector;
use loqa_live::live::{
    ClientMessage, FunctionResponse, Handshake, SendOutcome, ServerMessage, SessionTransport,
    TransportEvent,
};
use loqa_live::SessionConfig;
use serde_json::json;
use std::time::Duration;

const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

async fn open(
    connector: &FakeConnector,
    capacity: usize,
) -> Result<(SessionTransport, loqa_live::live::TransportStreams)> {
    SessionTransport::open(connector, SessionConfig::default().setup_message(), capacity, SETUP_TIMEOUT).await
}

#[test]
fn test_setup_message_serialization() -> Result<()> {
    let config = SessionConfig {
        voice: Some("Puck".into()),
        ..SessionConfig::default()
    };

    let value = serde_json::to_value(ClientMessage::Setup(config.setup_message()))?;
    let setup = &value["setup"];

    assert_eq!(setup["model"], json!(config.model));
    assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        json!("Puck")
    );
    assert!(setup["inputAudioTranscription"].is_object());
    assert!(setup["outputAudioTranscription"].is_object());

    let names: Vec<&str> = setup["tools"][0]["functionDeclarations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["setBrightness", "toggleFlashlight", "toggleWifi", "checkBattery", "openApp", "goHome"]
    );

    Ok(())
}

#[test]
fn test_audio_message_serialization() -> Result<()> {
    let json = serde_json::to_value(ClientMessage::audio(&[1, 0, 255, 127]))?;

    let chunk = &json["realtimeInput"]["mediaChunks"][0];
    assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(
        base64::engine::general_purpose::STANDARD.decode(chunk["data"].as_str().unwrap())?,
        vec![1, 0, 255, 127]
    );

    Ok(())
}

#[test]
fn test_tool_response_serialization() -> Result<()> {
    let msg = ClientMessage::tool_response(vec![FunctionResponse {
        id: "c1".into(),
        name: "goHome".into(),
        response: json!({ "status": "Returned to home screen" }),
    }]);

    let json = serde_json::to_value(msg)?;
    assert_eq!(
        json,
        json!({
            "toolResponse": {
                "functionResponses": [
                    { "id": "c1", "name": "goHome", "response": { "status": "Returned to home screen" } }
                ]
            }
        })
    );

    Ok(())
}

#[test]
fn test_server_message_parts() -> Result<()> {
    let msg: ServerMessage = serde_json::from_value(json!({
        "serverContent": {
            "modelTurn": {
                "parts": [
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } },
                    { "text": "thinking" },
                    { "inlineData": { "mimeType": "image/png", "data": "xyz" } },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AQA=" } }
                ]
            },
            "interrupted": true
        },
        "goAway": { "timeLeft": "10s" }
    }))?;

    assert!(!msg.is_setup_complete());
    assert_eq!(msg.audio_payloads().collect::<Vec<_>>(), vec!["AAA=", "AQA="]);
    assert!(msg.server_content.as_ref().unwrap().interrupted);
    assert!(!msg.server_content.as_ref().unwrap().turn_complete);
    assert_eq!(msg.go_away.unwrap().time_left.as_deref(), Some("10s"));

    let ack: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#)?;
    assert!(ack.is_setup_complete());

    Ok(())
}

#[test]
fn test_incomplete_parts_do_not_discard_the_message() -> Result<()> {
    let msg: ServerMessage = serde_json::from_value(json!({
        "serverContent": {
            "modelTurn": {
                "parts": [
                    { "inlineData": { "data": "AAA=" } },
                    { "inlineData": { "mimeType": "audio/pcm;rate=24000" } }
                ]
            },
            "outputTranscription": { "text": "Done." },
            "turnComplete": true
        },
        "toolCall": {
            "functionCalls": [
                { "id": "x", "args": {} },
                { "id": "y", "name": "goHome", "args": {} }
            ]
        }
    }))?;

    let content = msg.server_content.as_ref().unwrap();
    assert!(content.turn_complete);
    assert_eq!(msg.audio_payloads().collect::<Vec<_>>(), vec!["AAA="]);

    let calls = &msg.tool_call.as_ref().unwrap().function_calls;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, "");
    assert_eq!(calls[1].name, "goHome");
    Ok(())
}

#[tokio::test]
async fn test_sends_before_setup_complete_are_deferred() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, mut streams) =
        open(&connector, 16).await?;
    let mut service = ends.recv().await.unwrap();

    assert!(matches!(service.from_client.recv().await, Some(ClientMessage::Setup(_))));
    assert_eq!(transport.handshake(), Handshake::NotReady);

    let sender = transport.sender();
    assert_eq!(sender.send_audio(&[0, 0]), SendOutcome::Queued);
    assert_eq!(sender.send_audio(&[1, 0]), SendOutcome::Queued);

    // Nothing reaches the link yet
    let early = tokio::time::timeout(Duration::from_millis(100), service.from_client.recv()).await;
    assert!(early.is_err());

    service.setup_complete().await;
    assert_eq!(streams.events.recv().await, Some(TransportEvent::Ready));
    assert!(transport.is_ready());

    // Deferred sends go out in order
    for expected in [[0u8, 0], [1, 0]] {
        let msg = service.from_client.recv().await.unwrap();
        assert_eq!(msg, ClientMessage::audio(&expected));
    }

    // The acknowledgment itself is still routed
    assert!(streams.messages.recv().await.unwrap().is_setup_complete());

    transport.close();
    Ok(())
}

#[tokio::test]
async fn test_send_after_ready_goes_straight_out() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, mut streams) =
        open(&connector, 16).await?;
    let mut service = ends.recv().await.unwrap();
    service.from_client.recv().await;

    service.setup_complete().await;
    assert_eq!(streams.events.recv().await, Some(TransportEvent::Ready));

    transport.sender().send_tool_response(Vec::new()).await?;
    assert_eq!(
        service.from_client.recv().await,
        Some(ClientMessage::tool_response(Vec::new()))
    );

    transport.close();
    Ok(())
}

#[tokio::test]
async fn test_full_queue_drops_audio() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, _streams) =
        open(&connector, 1).await?;
    let _service = ends.recv().await.unwrap();

    let sender = transport.sender();
    let outcomes: Vec<SendOutcome> = (0..8).map(|_| sender.send_audio(&[0, 0])).collect();

    // The writer cannot drain between synchronous sends
    assert_eq!(outcomes[0], SendOutcome::Queued);
    assert!(outcomes.contains(&SendOutcome::Dropped));

    transport.close();
    Ok(())
}

#[tokio::test]
async fn test_remote_close_is_reported() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, mut streams) =
        open(&connector, 16).await?;
    let service = ends.recv().await.unwrap();

    drop(service);

    assert_eq!(streams.events.recv().await, Some(TransportEvent::Closed(None)));
    transport.close();
    Ok(())
}

#[tokio::test]
async fn test_deferred_queue_is_bounded() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, mut streams) = open(&connector, 2).await?;
    let mut service = ends.recv().await.unwrap();
    service.from_client.recv().await;

    // Let the writer move each frame into its deferred queue before the next
    let sender = transport.sender();
    for i in 0..6u8 {
        assert_eq!(sender.send_audio(&[i, 0]), SendOutcome::Queued);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    service.setup_complete().await;
    assert_eq!(streams.events.recv().await, Some(TransportEvent::Ready));

    // Only the first frames were kept; the next message is the one sent after Ready
    assert_eq!(service.from_client.recv().await, Some(ClientMessage::audio(&[0, 0])));
    assert_eq!(service.from_client.recv().await, Some(ClientMessage::audio(&[1, 0])));
    sender.send_tool_response(Vec::new()).await?;
    assert_eq!(
        service.from_client.recv().await,
        Some(ClientMessage::tool_response(Vec::new()))
    );

    transport.close();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_setup_acknowledgment_is_an_error() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, mut streams) = SessionTransport::open(
        connector.as_ref(),
        SessionConfig::default().setup_message(),
        16,
        Duration::from_secs(5),
    )
    .await?;
    let _service = ends.recv().await.unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(
        streams.events.recv().await,
        Some(TransportEvent::Error("setup not acknowledged".into()))
    );
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(!transport.is_ready());

    transport.close();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_setup_disarms_the_deadline() -> Result<()> {
    let (connector, mut ends) = FakeConnector::new();
    let (transport, mut streams) = SessionTransport::open(
        connector.as_ref(),
        SessionConfig::default().setup_message(),
        16,
        Duration::from_secs(5),
    )
    .await?;
    let service = ends.recv().await.unwrap();

    service.setup_complete().await;
    assert_eq!(streams.events.recv().await, Some(TransportEvent::Ready));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(streams.events.try_recv().is_err());
    assert!(transport.is_ready());

    transport.close();
    Ok(())
}
