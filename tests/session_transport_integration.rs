//! SessionTransport against a mock Live server.

mod mock_providers;

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use livescape::core::session::{
    ConnectionState, EndpointConfig, InboundEnvelope, OutboundEnvelope, SessionConfig,
    SessionError, SessionTransport, TranscriptSource, TransportEvent, TransportEvents,
};
use mock_providers::MockLiveServer;

fn session_config(server: &MockLiveServer) -> SessionConfig {
    SessionConfig {
        endpoint: EndpointConfig::proxy(format!("{}?token=test-token", server.url())),
        model: "gemini-live-test".to_string(),
        system_instruction: Some("You are a tour guide.".to_string()),
        voice: Some("Puck".to_string()),
        transcription: true,
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

async fn next_inbound(events: &mut TransportEvents) -> InboundEnvelope {
    loop {
        let event = timeout(Duration::from_secs(3), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let TransportEvent::Inbound(envelope) = event {
            return envelope;
        }
    }
}

#[tokio::test]
async fn test_connect_sends_setup_first() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();

    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Active);
    assert!(transport.session_id().is_some());

    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    let frames = server.frames();
    let setup = &frames[0]["setup"];
    assert_eq!(setup["model"], "models/gemini-live-test");
    assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
        "Puck"
    );
    assert_eq!(
        setup["systemInstruction"]["parts"][0]["text"],
        "You are a tour guide."
    );
    assert!(setup.get("inputAudioTranscription").is_some());

    // The proxy URL is used verbatim, token included
    assert_eq!(server.request_uris(), vec!["/ws?token=test-token".to_string()]);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_outbound_order_is_preserved() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let _events = transport.connect(session_config(&server)).await.unwrap();

    transport.send(OutboundEnvelope::AudioChunk {
        mime_type: "audio/pcm;rate=16000".to_string(),
        data: "AAAA".to_string(),
    });
    transport.send(OutboundEnvelope::TextContext {
        text: "What is that?".to_string(),
        turn_complete: true,
    });
    transport.send(OutboundEnvelope::VisionFrame {
        mime_type: "image/jpeg".to_string(),
        data: "/9j/".to_string(),
    });

    mock_providers::wait_until(|| server.frames().len() >= 4).await;
    let frames = server.frames();
    assert!(frames[0].get("setup").is_some());
    assert_eq!(
        frames[1]["realtimeInput"]["mediaChunks"][0]["mimeType"],
        "audio/pcm;rate=16000"
    );
    assert_eq!(frames[2]["clientContent"]["turns"][0]["parts"][0]["text"], "What is that?");
    assert_eq!(frames[2]["clientContent"]["turnComplete"], true);
    assert_eq!(
        frames[3]["realtimeInput"]["mediaChunks"][0]["mimeType"],
        "image/jpeg"
    );

    transport.disconnect().await;
}

#[tokio::test]
async fn test_inbound_messages_decoded_in_order() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    server.push(json!({
        "serverContent": {
            "modelTurn": { "parts": [{ "text": "A harbour at dawn." }] },
            "outputTranscription": { "text": "A harbour at dawn." }
        }
    }));
    server.push(json!({
        "toolCall": { "functionCalls": [{ "id": "c1", "name": "look_at", "args": { "u": 0.25, "v": 0.5 } }] }
    }));
    server.push(json!({ "toolCallCancellation": { "ids": ["c1"] } }));
    server.push(json!({ "serverContent": { "interrupted": true } }));
    server.push(json!({ "serverContent": { "turnComplete": true } }));

    assert_eq!(
        next_inbound(&mut events).await,
        InboundEnvelope::TextFragment("A harbour at dawn.".to_string())
    );
    assert_eq!(
        next_inbound(&mut events).await,
        InboundEnvelope::Transcription {
            source: TranscriptSource::Agent,
            text: "A harbour at dawn.".to_string()
        }
    );
    match next_inbound(&mut events).await {
        InboundEnvelope::ToolCallRequest(calls) => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].id.as_deref(), Some("c1"));
            assert_eq!(calls[0].name, "look_at");
        }
        other => panic!("unexpected envelope: {other:?}"),
    }
    assert_eq!(
        next_inbound(&mut events).await,
        InboundEnvelope::ToolCallCancellation(vec!["c1".to_string()])
    );
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::Interrupted);
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::TurnComplete);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_undecodable_frame_is_dropped() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    // Bad base64 audio fails to decode; the session carries on
    server.push(json!({
        "serverContent": { "modelTurn": { "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "***" } }] } }
    }));
    server.push(json!({ "serverContent": { "turnComplete": true } }));

    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::TurnComplete);
    assert!(transport.is_active());

    transport.disconnect().await;
}

#[tokio::test]
async fn test_binary_frames_read_as_utf8_json() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    // Invalid UTF-8 is dropped without ending the session
    server.push_binary(vec![0xff, 0xfe, 0x7b, 0x00]);
    let tool_call = json!({
        "toolCall": { "functionCalls": [{ "id": "b1", "name": "reset_view", "args": {} }] }
    });
    server.push_binary(tool_call.to_string().into_bytes());

    match next_inbound(&mut events).await {
        InboundEnvelope::ToolCallRequest(calls) => {
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].id.as_deref(), Some("b1"));
            assert_eq!(calls[0].name, "reset_view");
        }
        other => panic!("unexpected envelope: {other:?}"),
    }
    assert_eq!(transport.state(), ConnectionState::Active);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_resumption_handle_and_go_away() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    server.push(json!({ "sessionResumptionUpdate": { "newHandle": "resume-42", "resumable": true } }));
    server.push(json!({ "goAway": { "timeLeft": "10s" } }));

    assert_eq!(
        next_inbound(&mut events).await,
        InboundEnvelope::SessionResumptionUpdate {
            handle: Some("resume-42".to_string()),
            resumable: true
        }
    );
    assert_eq!(
        next_inbound(&mut events).await,
        InboundEnvelope::GoAway {
            time_left: Some("10s".to_string())
        }
    );
    assert_eq!(transport.resumption_handle().as_deref(), Some("resume-42"));

    // Reconnect carrying the handle
    transport.disconnect().await;
    let mut config = session_config(&server);
    config.resume_handle = transport.resumption_handle();
    let _events = transport.connect(config).await.unwrap();

    let setups = server.wait_for("setup", 2).await;
    assert_eq!(setups[1]["setup"]["sessionResumption"]["handle"], "resume-42");

    transport.disconnect().await;
}

#[tokio::test]
async fn test_server_close_reported_once() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    server.close(1011, "internal error");

    let closed = timeout(Duration::from_secs(3), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        closed,
        TransportEvent::Closed {
            code: Some(1011),
            reason: "internal error".to_string()
        }
    );
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    // Sending after the close neither fails nor reaches the wire
    let before = server.frames().len();
    transport.send(OutboundEnvelope::TextContext {
        text: "hello?".to_string(),
        turn_complete: true,
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.frames().len(), before);
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_silent() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let mut events = transport.connect(session_config(&server)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    transport.disconnect().await;
    transport.disconnect().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(transport.session_id().is_none());

    // An owner-requested close is not reported as Closed
    let next = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(matches!(next, Ok(None) | Err(_)));
}

#[tokio::test]
async fn test_second_connect_rejected() {
    let server = MockLiveServer::start().await;
    let mut transport = SessionTransport::new();
    let _events = transport.connect(session_config(&server)).await.unwrap();

    let result = transport.connect(session_config(&server)).await;
    assert!(matches!(result, Err(SessionError::AlreadyConnected)));

    transport.disconnect().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_error() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport = SessionTransport::new();
    let result = transport
        .connect(SessionConfig {
            endpoint: EndpointConfig::proxy(format!("ws://{addr}/ws")),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(SessionError::Connection { .. })));
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}
