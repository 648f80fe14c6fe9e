//! Duplex WebSocket transport for a live agent session.
//!
//! # Example
//!
//! ```rust,ignore
//! use livescape::core::session::{
//!     EndpointConfig, OutboundEnvelope, SessionConfig, SessionTransport, TransportEvent,
//! };
//!
//! let mut transport = SessionTransport::new();
//! let mut events = transport
//!     .connect(SessionConfig {
//!         endpoint: EndpointConfig::proxy("wss://edge.example.com/ws?token=..."),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! transport.send(OutboundEnvelope::TextContext {
//!     text: "What am I looking at?".to_string(),
//!     turn_complete: true,
//! });
//!
//! while let Some(TransportEvent::Inbound(envelope)) = events.recv().await {
//!     println!("{}", envelope.kind());
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use super::base::{ConnectionState, SessionConfig, SessionError, SessionResult, TurnState};
use super::messages::{
    ClientMessage, InboundEnvelope, OutboundEnvelope, SetupRequest, decode_server_message,
};

/// Event delivered to the session owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Inbound(InboundEnvelope),
    /// The connection ended without `disconnect()` being called
    Closed { code: Option<u16>, reason: String },
}

/// Receiver for everything the transport surfaces.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// State shared between the transport handle and its connection task.
struct Shared {
    state: RwLock<ConnectionState>,
    turn: RwLock<TurnState>,
    resumption_handle: RwLock<Option<String>>,
    intentional_disconnect: AtomicBool,
}

/// Owns the duplex connection to the agent.
///
/// Outbound envelopes go through one FIFO channel to the socket writer, so
/// send order is wire order. Inbound frames are decoded once and delivered
/// in arrival order on the event channel returned by
/// [`connect`](Self::connect).
///
/// A lost connection is reported as [`TransportEvent::Closed`] and never
/// retried. To continue, connect again with
/// [`resumption_handle`](Self::resumption_handle) as the resume handle.
pub struct SessionTransport {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    session_id: RwLock<Option<Uuid>>,
    model: RwLock<Option<String>>,
}

impl Default for SessionTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                turn: RwLock::new(TurnState::Idle),
                resumption_handle: RwLock::new(None),
                intentional_disconnect: AtomicBool::new(false),
            }),
            sender: Mutex::new(None),
            connection_handle: Mutex::new(None),
            session_id: RwLock::new(None),
            model: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn turn_state(&self) -> TurnState {
        *self.shared.turn.read()
    }

    pub fn is_active(&self) -> bool {
        self.state().accepts_sends()
    }

    /// Local identifier of the current session, for logs.
    pub fn session_id(&self) -> Option<Uuid> {
        *self.session_id.read()
    }

    /// Model negotiated in the current session's setup.
    pub fn model(&self) -> Option<String> {
        self.model.read().clone()
    }

    /// Latest resumable handle announced by the server.
    pub fn resumption_handle(&self) -> Option<String> {
        self.shared.resumption_handle.read().clone()
    }

    /// Open the connection and send the setup.
    ///
    /// Resolves as soon as the setup is on the wire. The server's
    /// acknowledgement arrives later as [`InboundEnvelope::SetupComplete`].
    pub async fn connect(&mut self, config: SessionConfig) -> SessionResult<TransportEvents> {
        if self.state() != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }

        self.shared
            .intentional_disconnect
            .store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        match self.open(config).await {
            Ok(events) => Ok(events),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn open(&mut self, config: SessionConfig) -> SessionResult<TransportEvents> {
        let url = config.endpoint.resolve()?;
        let redacted = config.endpoint.redacted();
        let session_id = Uuid::new_v4();

        tracing::info!(session_id = %session_id, url = %redacted, "Connecting live session");

        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    SessionError::Timeout(format!(
                        "connecting to {redacted} took longer than {:?}",
                        config.connect_timeout
                    ))
                })?
                .map_err(connect_error)?;

        self.set_state(ConnectionState::AwaitingSetupAck);

        let model = config.qualified_model();
        let resume_handle = config.resume_handle.clone();
        let setup = OutboundEnvelope::Setup(SetupRequest {
            model: model.clone(),
            system_instruction: config.system_instruction.clone(),
            tools: config.tools.clone(),
            response_modalities: config.response_modalities.clone(),
            voice: config.voice.clone(),
            resume_handle,
            transcription: config.transcription,
        });
        let setup_json = serde_json::to_string(&setup.to_client_message())
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        let (mut ws_sink, ws_stream) = ws_stream.split();
        ws_sink
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| SessionError::connection(format!("failed to send setup: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        *self.session_id.write() = Some(session_id);
        *self.model.write() = Some(model.clone());
        *self.shared.turn.write() = TurnState::Idle;
        self.set_state(ConnectionState::Active);

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            connection_loop(session_id, ws_sink, ws_stream, rx, events_tx, shared).await;
        });
        *self.connection_handle.lock() = Some(handle);

        tracing::info!(session_id = %session_id, model = %model, "Live session setup sent");
        Ok(events_rx)
    }

    /// Queue an envelope for the wire.
    ///
    /// Never fails. Outside the active states the envelope is dropped and
    /// logged. Setup envelopes are always dropped: the transport sends the
    /// only setup itself during [`connect`](Self::connect).
    pub fn send(&self, envelope: OutboundEnvelope) {
        if matches!(envelope, OutboundEnvelope::Setup(_)) {
            tracing::warn!("Dropping setup envelope: setup is sent once by connect()");
            return;
        }

        let state = self.state();
        if !state.accepts_sends() {
            tracing::debug!(kind = envelope.kind(), state = %state, "Dropping send, session not active");
            return;
        }

        let delivered = match self.sender.lock().as_ref() {
            Some(sender) => sender.send(envelope.to_client_message()).is_ok(),
            None => false,
        };
        if !delivered {
            tracing::debug!(kind = envelope.kind(), "Dropping send, connection task gone");
        }
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&mut self) {
        if self.state() == ConnectionState::Disconnected && self.sender.lock().is_none() {
            return;
        }

        self.shared
            .intentional_disconnect
            .store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Closing);

        // Dropping the sender lets the loop send a close frame and exit.
        self.sender.lock().take();
        let handle = self.connection_handle.lock().take();
        if let Some(mut handle) = handle {
            let finished =
                tokio::time::timeout(std::time::Duration::from_secs(2), &mut handle).await;
            if finished.is_err() {
                handle.abort();
            }
        }

        self.set_state(ConnectionState::Disconnected);
        *self.shared.turn.write() = TurnState::Idle;
        let session_id = self.session_id.write().take();
        if let Some(id) = session_id {
            tracing::info!(session_id = %id, "Live session disconnected");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.shared.state.write() = state;
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.shared
            .intentional_disconnect
            .store(true, Ordering::SeqCst);
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
    }
}

fn connect_error(error: tungstenite::Error) -> SessionError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            SessionError::Connection {
                reason: format!("upgrade rejected with HTTP {status}"),
                status: Some(status),
            }
        }
        other => SessionError::connection(other.to_string()),
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn connection_loop<S, R>(
    session_id: Uuid,
    mut ws_sink: S,
    mut ws_stream: R,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<Shared>,
) where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
    R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut close_code = None;
    let mut close_reason = String::from("connection closed");

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Handle dropped by disconnect()
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(session_id = %session_id, "Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    tracing::error!(session_id = %session_id, "Failed to send WebSocket message: {}", e);
                    close_reason = e.to_string();
                    break;
                }
            }

            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(session_id, text.as_str(), &events, &shared);
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_frame(session_id, text, &events, &shared),
                        Err(e) => {
                            tracing::warn!(session_id = %session_id, "Dropping non-UTF-8 binary frame: {}", e);
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!(session_id = %session_id, "Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            close_code = Some(u16::from(frame.code));
                            close_reason = frame.reason.to_string();
                        }
                        tracing::info!(
                            session_id = %session_id,
                            code = ?close_code,
                            reason = %close_reason,
                            "WebSocket closed by server"
                        );
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(session_id = %session_id, "WebSocket error: {}", e);
                        close_reason = e.to_string();
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if shared.intentional_disconnect.load(Ordering::SeqCst) {
        return;
    }

    *shared.state.write() = ConnectionState::Disconnected;
    *shared.turn.write() = TurnState::Idle;
    let _ = events.send(TransportEvent::Closed {
        code: close_code,
        reason: close_reason,
    });
}

fn handle_frame(
    session_id: Uuid,
    text: &str,
    events: &mpsc::UnboundedSender<TransportEvent>,
    shared: &Shared,
) {
    let envelopes = match decode_server_message(text) {
        Ok(envelopes) => envelopes,
        Err(e) => {
            tracing::warn!(session_id = %session_id, "Failed to decode server message: {}", e);
            return;
        }
    };
    if envelopes.is_empty() {
        tracing::trace!(session_id = %session_id, "Ignoring frame with no known fields");
    }

    for envelope in envelopes {
        track_state(shared, &envelope);
        tracing::debug!(session_id = %session_id, kind = envelope.kind(), "Inbound message");
        if events.send(TransportEvent::Inbound(envelope)).is_err() {
            tracing::debug!(session_id = %session_id, "Event receiver dropped");
            return;
        }
    }
}

fn track_state(shared: &Shared, envelope: &InboundEnvelope) {
    match envelope {
        InboundEnvelope::Interrupted => {
            let mut state = shared.state.write();
            if *state == ConnectionState::Active {
                *state = ConnectionState::Interrupted;
            }
            *shared.turn.write() = TurnState::Interrupted;
        }
        InboundEnvelope::AudioChunk { .. } | InboundEnvelope::TextFragment(_) => {
            resume_active(shared);
            *shared.turn.write() = TurnState::AgentSpeaking;
        }
        InboundEnvelope::TurnComplete => {
            resume_active(shared);
            *shared.turn.write() = TurnState::Idle;
        }
        InboundEnvelope::SessionResumptionUpdate {
            handle: Some(handle),
            resumable: true,
        } => {
            *shared.resumption_handle.write() = Some(handle.clone());
        }
        _ => {}
    }
}

fn resume_active(shared: &Shared) {
    let mut state = shared.state.write();
    if *state == ConnectionState::Interrupted {
        *state = ConnectionState::Active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::EndpointConfig;
    use std::time::Duration;

    #[test]
    fn test_new_transport_is_disconnected() {
        let transport = SessionTransport::new();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.turn_state(), TurnState::Idle);
        assert!(transport.session_id().is_none());
        assert!(transport.resumption_handle().is_none());
    }

    #[test]
    fn test_send_while_disconnected_is_silent() {
        let transport = SessionTransport::new();
        transport.send(OutboundEnvelope::TextContext {
            text: "hello".to_string(),
            turn_complete: true,
        });
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut transport = SessionTransport::new();
        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
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

    #[tokio::test]
    async fn test_connect_without_endpoint_fails_fast() {
        let mut transport = SessionTransport::new();
        let result = transport.connect(SessionConfig::default()).await;
        assert!(matches!(result, Err(SessionError::InvalidConfiguration(_))));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_interrupt_state_transitions() {
        let shared = Shared {
            state: RwLock::new(ConnectionState::Active),
            turn: RwLock::new(TurnState::Idle),
            resumption_handle: RwLock::new(None),
            intentional_disconnect: AtomicBool::new(false),
        };

        track_state(&shared, &InboundEnvelope::TextFragment("hi".to_string()));
        assert_eq!(*shared.turn.read(), TurnState::AgentSpeaking);

        track_state(&shared, &InboundEnvelope::Interrupted);
        assert_eq!(*shared.state.read(), ConnectionState::Interrupted);
        assert_eq!(*shared.turn.read(), TurnState::Interrupted);

        track_state(&shared, &InboundEnvelope::TurnComplete);
        assert_eq!(*shared.state.read(), ConnectionState::Active);
        assert_eq!(*shared.turn.read(), TurnState::Idle);
    }

    #[test]
    fn test_resumption_handle_tracked_only_when_resumable() {
        let shared = Shared {
            state: RwLock::new(ConnectionState::Active),
            turn: RwLock::new(TurnState::Idle),
            resumption_handle: RwLock::new(None),
            intentional_disconnect: AtomicBool::new(false),
        };
        track_state(
            &shared,
            &InboundEnvelope::SessionResumptionUpdate {
                handle: Some("h1".to_string()),
                resumable: false,
            },
        );
        assert!(shared.resumption_handle.read().is_none());
        track_state(
            &shared,
            &InboundEnvelope::SessionResumptionUpdate {
                handle: Some("h2".to_string()),
                resumable: true,
            },
        );
        assert_eq!(shared.resumption_handle.read().as_deref(), Some("h2"));
    }
}
