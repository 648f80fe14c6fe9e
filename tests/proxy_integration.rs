//! Edge proxy routes, relay and scene description.
//!
//! Rejections are exercised through the router with `oneshot`; the relay
//! runs on a real listener between a SessionTransport and the mock Live
//! server.

mod mock_providers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tower::util::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use image::{DynamicImage, RgbImage};
use livescape::config::{AppConfig, AuthToken};
use livescape::core::session::{
    EndpointConfig, InboundEnvelope, SessionConfig, SessionTransport, TransportEvent,
    TransportEvents,
};
use livescape::core::vision::{VisionClient, encode_jpeg};
use livescape::proxy::{self, ProxyState, router};
use mock_providers::MockLiveServer;

const SECRET: &str = "kiosk-secret";

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth_tokens = vec![AuthToken {
        id: "kiosk".into(),
        secret: SECRET.into(),
    }];
    config.upstream_api_key = Some("test-api-key".into());
    config
}

/// A ws:// URL nothing listens on.
fn dead_upstream() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/ws")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn vision_request(token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post("/vision").header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Serve the proxy on an ephemeral port. Dropping the sender stops it.
async fn spawn_proxy(config: AppConfig) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        proxy::serve(config, listener, async {
            let _ = stop_rx.await;
        })
        .await
        .unwrap();
    });
    (addr, stop_tx)
}

/// Serve a prepared router state on an ephemeral port.
async fn spawn_router(state: Arc<ProxyState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });
    addr
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

// =============================================================================
// Rejections
// =============================================================================

#[tokio::test]
async fn test_ws_without_token_is_401() {
    let app = router(ProxyState::new(test_config()));
    let response = app
        .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn test_ws_with_wrong_token_is_401() {
    let app = router(ProxyState::new(test_config()));
    let response = app
        .oneshot(Request::get("/ws?token=nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rate_limit_is_per_identity() {
    let mut config = test_config();
    config.auth_tokens.push(AuthToken {
        id: "phone".into(),
        secret: "phone-secret".into(),
    });
    config.rate_limit_per_minute = 1;
    config.rate_limit_burst = 2;
    let app = router(ProxyState::new(config));

    let log = |token: &str| {
        Request::post("/log")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message":"tick"}"#))
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(log(SECRET)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(log(SECRET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another identity has its own bucket
    let response = app.clone().oneshot(log("phone-secret")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_ws_exhausted_budget_is_403() {
    let mut config = test_config();
    config.session_budget_secs = 5;
    let state = ProxyState::new(config);
    state.budgets.record("kiosk", Duration::from_secs(6));
    let addr = spawn_router(state).await;

    let mut transport = SessionTransport::new();
    let err = transport
        .connect(relay_session(addr, SECRET))
        .await
        .unwrap_err();
    assert_eq!(err.upgrade_status(), Some(403));
}

#[tokio::test]
async fn test_plain_get_ws_never_dials_upstream() {
    let live = MockLiveServer::start().await;
    let mut config = test_config();
    config.upstream_live_url = live.url();

    let response = router(ProxyState::new(config))
        .oneshot(
            Request::get("/ws")
                .header("authorization", format!("Bearer {SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(live.connections(), 0);
}

#[tokio::test]
async fn test_auth_disabled_uses_anonymous_identity() {
    let mut config = AppConfig::default();
    config.auth_required = false;
    let app = router(ProxyState::new(config));

    let response = app
        .oneshot(
            Request::post("/log")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"message":"hello"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// POST /vision
// =============================================================================

#[tokio::test]
async fn test_vision_missing_image_is_400() {
    let app = router(ProxyState::new(test_config()));
    let response = app
        .oneshot(vision_request(Some(SECRET), json!({ "prompt": "What is this?" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Missing image data");
}

#[tokio::test]
async fn test_vision_requires_token() {
    let app = router(ProxyState::new(test_config()));
    let response = app
        .oneshot(vision_request(None, json!({ "image": "QUJD" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_vision_forwards_to_generate_content() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-3-flash-preview:generateContent"))
        .and(header("x-goog-api-key", "test-api-key"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [
                { "text": "Describe this scene." },
                { "inline_data": { "mime_type": "image/jpeg", "data": "QUJD" } }
            ] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "A quiet harbour." }] } }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.upstream_rest_url = upstream.uri();
    let app = router(ProxyState::new(config));

    let response = app
        .oneshot(vision_request(
            Some(SECRET),
            json!({ "image": "data:image/jpeg;base64,QUJD" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "text": "A quiet harbour." }));
}

#[tokio::test]
async fn test_vision_upstream_failure_is_502() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.upstream_rest_url = upstream.uri();
    let app = router(ProxyState::new(config));

    let response = app
        .oneshot(vision_request(Some(SECRET), json!({ "image": "QUJD" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_vision_client_through_proxy() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-3-flash-preview:generateContent"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [{ "text": "Any people?" }] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "No one is visible." }] } }]
        })))
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.upstream_rest_url = upstream.uri();
    let (addr, _stop) = spawn_proxy(config).await;

    let client = VisionClient::new(&format!("ws://{addr}/ws?token={SECRET}"), Some(SECRET.into()))
        .unwrap();
    assert_eq!(client.endpoint(), format!("http://{addr}/vision"));

    let frame = encode_jpeg(&DynamicImage::ImageRgb8(RgbImage::new(32, 32)), 768, 70).unwrap();
    let text = client.describe(&frame, Some("Any people?")).await.unwrap();
    assert_eq!(text, "No one is visible.");
}

// =============================================================================
// GET /token
// =============================================================================

fn token_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get("/token");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_token_minted_from_provider() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth_tokens"))
        .and(header("x-goog-api-key", "test-api-key"))
        .and(body_partial_json(json!({ "uses": 100 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "auth_tokens/ephemeral-123"
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.upstream_token_url = upstream.uri();
    let app = router(ProxyState::new(config));

    let response = app.oneshot(token_request(Some(SECRET))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "token": "auth_tokens/ephemeral-123" })
    );
}

#[tokio::test]
async fn test_token_requires_client_token() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "t" })))
        .expect(0)
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.upstream_token_url = upstream.uri();
    let app = router(ProxyState::new(config));

    let response = app.oneshot(token_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_upstream_failure_is_502() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth_tokens"))
        .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
        .mount(&upstream)
        .await;

    let mut config = test_config();
    config.upstream_token_url = upstream.uri();
    let app = router(ProxyState::new(config));

    let response = app.oneshot(token_request(Some(SECRET))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_token_without_api_key_is_500() {
    let mut config = test_config();
    config.upstream_api_key = None;
    let app = router(ProxyState::new(config));

    let response = app.oneshot(token_request(Some(SECRET))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// =============================================================================
// Relay
// =============================================================================

fn relay_session(addr: SocketAddr, token: &str) -> SessionConfig {
    SessionConfig {
        endpoint: EndpointConfig::proxy(format!("ws://{addr}/ws?token={token}")),
        model: "gemini-live-test".to_string(),
        system_instruction: Some("You are a tour guide.".to_string()),
        connect_timeout: Duration::from_secs(3),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_relay_injects_instructions_and_forwards_both_ways() {
    let live = MockLiveServer::start().await;
    let mut config = test_config();
    config.upstream_live_url = live.url();
    config.extra_instructions = Some("Keep answers short.".into());
    let (addr, _stop) = spawn_proxy(config).await;

    let mut transport = SessionTransport::new();
    let mut events = transport.connect(relay_session(addr, SECRET)).await.unwrap();
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::SetupComplete);

    let setups = live.wait_for("setup", 1).await;
    let parts = setups[0]["setup"]["systemInstruction"]["parts"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0]["text"], "You are a tour guide.");
    assert_eq!(parts[1]["text"], "Keep answers short.");

    // The provider key rides on the upstream URL, never the client's token
    let uris = live.request_uris();
    assert!(uris[0].contains("key=test-api-key"));
    assert!(!uris[0].contains(SECRET));

    // Only the first message is rewritten
    transport.send(livescape::core::session::OutboundEnvelope::TextContext {
        text: "hello".into(),
        turn_complete: true,
    });
    let content = live.wait_for("clientContent", 1).await;
    assert_eq!(content[0]["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
    assert!(content[0].get("setup").is_none());

    live.push(json!({ "serverContent": { "turnComplete": true } }));
    assert_eq!(next_inbound(&mut events).await, InboundEnvelope::TurnComplete);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_relay_rejection_surfaces_as_connection_error() {
    let live = MockLiveServer::start().await;
    let mut config = test_config();
    config.upstream_live_url = live.url();
    let (addr, _stop) = spawn_proxy(config).await;

    let mut transport = SessionTransport::new();
    let err = transport
        .connect(relay_session(addr, "wrong-token"))
        .await
        .unwrap_err();
    assert_eq!(err.upgrade_status(), Some(401));
    assert_eq!(live.connections(), 0);
}

#[tokio::test]
async fn test_relay_unreachable_upstream_surfaces_502() {
    let mut config = test_config();
    config.upstream_live_url = dead_upstream();
    let (addr, _stop) = spawn_proxy(config).await;

    let mut transport = SessionTransport::new();
    let err = transport
        .connect(relay_session(addr, SECRET))
        .await
        .unwrap_err();
    assert_eq!(err.upgrade_status(), Some(502));
}

#[tokio::test]
async fn test_relay_closes_when_budget_runs_out() {
    let live = MockLiveServer::start().await;
    let mut config = test_config();
    config.upstream_live_url = live.url();
    config.session_budget_secs = 1;
    let (addr, _stop) = spawn_proxy(config).await;

    let mut transport = SessionTransport::new();
    let mut events = transport.connect(relay_session(addr, SECRET)).await.unwrap();

    let closed = loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("relay did not close")
            .expect("event channel closed");
        if let TransportEvent::Closed { code, .. } = event {
            break code;
        }
    };
    assert_eq!(closed, Some(1008));

    // The spent identity is now refused before the upgrade
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut retry = SessionTransport::new();
    let err = retry
        .connect(relay_session(addr, SECRET))
        .await
        .unwrap_err();
    assert_eq!(err.upgrade_status(), Some(403));
}

async fn wait_closed(events: &mut TransportEvents) -> Option<u16> {
    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("relay did not close")
            .expect("event channel closed");
        if let TransportEvent::Closed { code, .. } = event {
            return code;
        }
    }
}

#[tokio::test]
async fn test_concurrent_relays_share_one_budget() {
    let live = MockLiveServer::start_concurrent().await;
    let mut config = test_config();
    config.upstream_live_url = live.url();
    config.session_budget_secs = 1;
    let state = ProxyState::new(config);
    let addr = spawn_router(state.clone()).await;

    let started = Instant::now();
    let mut first = SessionTransport::new();
    let mut first_events = first.connect(relay_session(addr, SECRET)).await.unwrap();
    let mut second = SessionTransport::new();
    let mut second_events = second.connect(relay_session(addr, SECRET)).await.unwrap();

    assert_eq!(wait_closed(&mut first_events).await, Some(1008));
    assert_eq!(wait_closed(&mut second_events).await, Some(1008));

    // Two sessions drain one allowance; together they stay within it
    assert!(started.elapsed() < Duration::from_millis(1500));
    mock_providers::wait_until(|| state.budgets.open_sessions("kiosk") == 0).await;
    assert!(state.budgets.used("kiosk") <= Duration::from_millis(1300));
    assert!(state.budgets.is_exhausted("kiosk"));
}
