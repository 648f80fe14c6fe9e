//! WebSocket relay between a client and the provider.

use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::budget::BudgetLease;
use super::error::{ProxyError, ProxyResult};
use crate::config::AppConfig;

/// Connected provider socket.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Policy-violation close sent when an identity runs out of session time.
const BUDGET_CLOSE_CODE: u16 = 1008;
const BUDGET_CLOSE_REASON: &str = "session budget exhausted";

/// Longest wait between budget checks while a relay is open.
const BUDGET_RECHECK: Duration = Duration::from_millis(250);

/// Per-connection relay parameters.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub identity: String,
    /// Appended to the system instruction of the first setup message
    pub extra_instructions: Option<String>,
}

/// Open the provider socket. Any failure maps to 502.
pub async fn connect_upstream(config: &AppConfig) -> ProxyResult<UpstreamSocket> {
    let url = upstream_url(config)?;
    let (socket, _response) =
        tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| ProxyError::Upstream("connect timed out".to_string()))?
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
    Ok(socket)
}

fn upstream_url(config: &AppConfig) -> ProxyResult<String> {
    let mut url = Url::parse(&config.upstream_live_url)
        .map_err(|e| ProxyError::NotConfigured(format!("invalid upstream URL: {e}")))?;
    if let Some(key) = &config.upstream_api_key {
        url.query_pairs_mut().append_pair("key", key);
    }
    Ok(url.to_string())
}

/// Append `extra` to the system instruction of a `setup` message.
///
/// Returns `None` when `message` is not a JSON setup message, in which case
/// it is forwarded untouched.
pub fn inject_system_instruction(message: &str, extra: &str) -> Option<String> {
    let mut value: Value = serde_json::from_str(message).ok()?;
    let setup = value.get_mut("setup")?.as_object_mut()?;
    let part = json!({ "text": extra });

    match setup.get_mut("systemInstruction") {
        Some(Value::Object(instruction)) => {
            let parts = instruction
                .entry("parts")
                .or_insert_with(|| Value::Array(Vec::new()));
            match parts.as_array_mut() {
                Some(parts) => parts.push(part),
                None => *parts = json!([part]),
            }
        }
        _ => {
            setup.insert("systemInstruction".to_string(), json!({ "parts": [part] }));
        }
    }

    serde_json::to_string(&value).ok()
}

/// Pump frames both ways until either side closes or the identity's budget
/// runs out.
///
/// The lease is settled when the relay returns. Returns how long it ran.
pub async fn relay(
    client: WebSocket,
    upstream: UpstreamSocket,
    ctx: RelayContext,
    lease: BudgetLease,
) -> Duration {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let budget_check = tokio::time::sleep(next_budget_check(&lease));
    tokio::pin!(budget_check);
    let limited = lease.time_left().is_some();

    let mut awaiting_first = true;

    loop {
        tokio::select! {
            message = client_rx.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::warn!(auth_id = %ctx.identity, "Client socket error: {}", e);
                        break;
                    }
                    None => break,
                };
                let closing = matches!(message, ws::Message::Close(_));
                let mut forwarded = client_to_upstream(message);

                if awaiting_first && is_data(&forwarded) {
                    awaiting_first = false;
                    let injected = match (&ctx.extra_instructions, &forwarded) {
                        (Some(extra), Message::Text(text)) => {
                            inject_system_instruction(text.as_str(), extra)
                        }
                        _ => None,
                    };
                    if let Some(injected) = injected {
                        tracing::debug!(auth_id = %ctx.identity, "Injected extra instructions into setup");
                        forwarded = Message::Text(injected.into());
                    }
                }

                if let Err(e) = upstream_tx.send(forwarded).await {
                    tracing::warn!(auth_id = %ctx.identity, "Upstream send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }

            message = upstream_rx.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::warn!(auth_id = %ctx.identity, "Upstream socket error: {}", e);
                        break;
                    }
                    None => break,
                };
                let closing = matches!(message, Message::Close(_));
                let Some(forwarded) = upstream_to_client(message) else {
                    continue;
                };
                if let Err(e) = client_tx.send(forwarded).await {
                    tracing::debug!(auth_id = %ctx.identity, "Client send failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }

            _ = &mut budget_check, if limited => {
                if !lease.is_exhausted() {
                    budget_check
                        .as_mut()
                        .reset(tokio::time::Instant::now() + next_budget_check(&lease));
                    continue;
                }
                tracing::info!(auth_id = %ctx.identity, "Session budget exhausted, closing relay");
                let _ = client_tx
                    .send(ws::Message::Close(Some(ws::CloseFrame {
                        code: BUDGET_CLOSE_CODE,
                        reason: BUDGET_CLOSE_REASON.into(),
                    })))
                    .await;
                let _ = upstream_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = upstream_tx.close().await;
    let _ = client_tx.close().await;
    lease.elapsed()
}

fn next_budget_check(lease: &BudgetLease) -> Duration {
    lease
        .time_left()
        .map_or(BUDGET_RECHECK, |left| left.min(BUDGET_RECHECK))
}

fn is_data(message: &Message) -> bool {
    matches!(message, Message::Text(_) | Message::Binary(_))
}

fn client_to_upstream(message: ws::Message) -> Message {
    match message {
        ws::Message::Text(text) => Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        })),
    }
}

fn upstream_to_client(message: Message) -> Option<ws::Message> {
    Some(match message {
        Message::Text(text) => ws::Message::Text(text.as_str().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Ping(data) => ws::Message::Ping(data),
        Message::Pong(data) => ws::Message::Pong(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().into(),
        })),
        Message::Frame(_) => return None,
    })
}
