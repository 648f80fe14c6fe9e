//! The live session event loop.
//!
//! One task owns the transport, capture, playback, vision sampler and
//! dispatcher. Every input (inbound envelopes, microphone frames, vision
//! ticks, render ticks, owner commands) is handled on that task in turn, so
//! nothing else needs to coordinate access to them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::audio::{AudioCaptureStream, AudioFrame, AudioPlaybackQueue};
use crate::core::camera::{CameraControlSurface, CameraState, UserInput};
use crate::core::session::{
    InboundEnvelope, OutboundEnvelope, SessionConfig, SessionResult, SessionTransport,
    TransportEvent, TransportEvents,
};
use crate::core::tools::{SharedCamera, ToolCallDispatcher, ToolResult};
use crate::core::vision::{VisionFrame, VisionSampler};

pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(16);

/// Longest frame step fed to the camera, so a stalled loop does not teleport it.
const MAX_FRAME_DT: f32 = 0.1;

/// Parameters for [`LiveSession::start`].
#[derive(Debug, Clone)]
pub struct LiveSessionConfig {
    /// Session setup. The tool list is replaced with the dispatcher's table.
    pub session: SessionConfig,
    /// Cadence of camera updates
    pub render_interval: Duration,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            render_interval: DEFAULT_RENDER_INTERVAL,
        }
    }
}

/// Media endpoints attached to a session. Each is optional except playback.
pub struct SessionMedia {
    pub capture: Option<AudioCaptureStream>,
    pub playback: AudioPlaybackQueue,
    pub vision: Option<VisionSampler>,
}

/// What the owner of a [`LiveSession`] is told about.
///
/// Agent audio goes straight to playback and is not reported.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Inbound(InboundEnvelope),
    /// Results sent back for one tool-call batch
    ToolResults(Vec<ToolResult>),
    /// The connection ended without the owner asking
    Closed { code: Option<u16>, reason: String },
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug)]
enum SessionCommand {
    Text { text: String, turn_complete: bool },
    Input(UserInput),
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running session.
pub struct LiveSession {
    session_id: Option<Uuid>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    camera: Arc<Mutex<CameraControlSurface>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Connect and start the event loop.
    ///
    /// Fails only if the connection cannot be established. Media attached
    /// to a failed session is dropped, which stops it.
    pub async fn start(
        config: LiveSessionConfig,
        camera: Arc<Mutex<CameraControlSurface>>,
        media: SessionMedia,
    ) -> SessionResult<(Self, SessionEvents)> {
        let shared: SharedCamera = camera.clone();
        let dispatcher = ToolCallDispatcher::new(shared);

        let mut session = config.session;
        session.tools = dispatcher.declarations();

        let mut transport = SessionTransport::new();
        let inbound = transport.connect(session).await?;
        let session_id = transport.session_id();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session_loop = SessionLoop {
            transport,
            dispatcher,
            camera: camera.clone(),
            playback: media.playback,
            capture: media.capture,
            vision: media.vision,
            events: events_tx,
        };
        let task = tokio::spawn(session_loop.run(
            inbound,
            commands_rx,
            cancel.clone(),
            config.render_interval,
        ));

        Ok((
            Self {
                session_id,
                commands: commands_tx,
                camera,
                cancel,
                task: Some(task),
            },
            events_rx,
        ))
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Whether the event loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Send user text. A no-op once the session has ended.
    pub fn send_text(&self, text: impl Into<String>, turn_complete: bool) {
        let _ = self.commands.send(SessionCommand::Text {
            text: text.into(),
            turn_complete,
        });
    }

    /// Forward direct user input to the camera on the next loop turn.
    pub fn user_input(&self, input: UserInput) {
        let _ = self.commands.send(SessionCommand::Input(input));
    }

    pub fn camera_state(&self) -> CameraState {
        self.camera.lock().state()
    }

    /// Stop media and close the connection. Idempotent.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!("Live session task failed: {}", e);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Event Loop
// =============================================================================

struct SessionLoop {
    transport: SessionTransport,
    dispatcher: ToolCallDispatcher,
    camera: Arc<Mutex<CameraControlSurface>>,
    playback: AudioPlaybackQueue,
    capture: Option<AudioCaptureStream>,
    vision: Option<VisionSampler>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut inbound: TransportEvents,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
        render_interval: Duration,
    ) {
        let mut render = tokio::time::interval(render_interval.max(Duration::from_millis(1)));
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                event = inbound.recv() => match event {
                    Some(TransportEvent::Inbound(envelope)) => self.handle_inbound(envelope),
                    Some(TransportEvent::Closed { code, reason }) => {
                        tracing::warn!(code = ?code, reason = %reason, "Live session closed by peer");
                        let _ = self.events.send(SessionEvent::Closed { code, reason });
                        break;
                    }
                    None => break,
                },

                Some(command) = commands.recv() => self.handle_command(command),

                frame = next_audio_frame(&mut self.capture), if self.capture.is_some() => {
                    match frame {
                        Some(frame) => self.send_audio(frame),
                        None => {
                            tracing::info!("Audio capture ended");
                            self.capture = None;
                        }
                    }
                }

                frame = next_vision_frame(&mut self.vision), if self.vision.is_some() => {
                    match frame {
                        Some(frame) => self.send_vision(frame),
                        None => self.vision = None,
                    }
                }

                _ = render.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_frame).as_secs_f32().min(MAX_FRAME_DT);
                    last_frame = now;
                    self.camera.lock().update(dt);
                }
            }
        }

        self.shutdown().await;
    }

    fn handle_inbound(&mut self, envelope: InboundEnvelope) {
        tracing::debug!(kind = envelope.kind(), "Inbound envelope");
        match envelope {
            InboundEnvelope::AudioChunk {
                samples,
                sample_rate,
            } => {
                self.playback.enqueue_pcm(&samples, sample_rate);
            }
            InboundEnvelope::Interrupted => {
                self.playback.flush();
                let _ = self.events.send(SessionEvent::Inbound(InboundEnvelope::Interrupted));
            }
            InboundEnvelope::ToolCallRequest(calls) => {
                let results = self.dispatcher.handle(&calls);
                let failed = results.iter().filter(|r| r.is_error()).count();
                tracing::info!(calls = calls.len(), failed, "Answered tool calls");
                self.transport
                    .send(OutboundEnvelope::ToolResults(results.clone()));
                let _ = self.events.send(SessionEvent::ToolResults(results));
            }
            InboundEnvelope::ToolCallCancellation(ids) => {
                // Calls run to completion before the next frame is read, so
                // there is nothing left to cancel.
                tracing::info!(ids = ?ids, "Agent cancelled tool calls");
                let _ = self
                    .events
                    .send(SessionEvent::Inbound(InboundEnvelope::ToolCallCancellation(ids)));
            }
            InboundEnvelope::GoAway { time_left } => {
                tracing::warn!(time_left = ?time_left, "Server is ending the session");
                let _ = self
                    .events
                    .send(SessionEvent::Inbound(InboundEnvelope::GoAway { time_left }));
            }
            InboundEnvelope::Error { code, message } => {
                tracing::error!(code = ?code, "Agent error: {}", message);
                let _ = self
                    .events
                    .send(SessionEvent::Inbound(InboundEnvelope::Error { code, message }));
            }
            other => {
                let _ = self.events.send(SessionEvent::Inbound(other));
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Text {
                text,
                turn_complete,
            } => self.transport.send(OutboundEnvelope::TextContext {
                text,
                turn_complete,
            }),
            SessionCommand::Input(input) => self.camera.lock().handle_input(input),
        }
    }

    fn send_audio(&self, frame: AudioFrame) {
        self.transport.send(OutboundEnvelope::AudioChunk {
            mime_type: frame.mime_type(),
            data: frame.to_base64(),
        });
    }

    fn send_vision(&self, frame: VisionFrame) {
        self.transport.send(frame.to_envelope());
    }

    async fn shutdown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut vision) = self.vision.take() {
            vision.stop();
        }
        self.playback.flush();
        self.camera.lock().stop();
        self.transport.disconnect().await;
    }
}

async fn next_audio_frame(capture: &mut Option<AudioCaptureStream>) -> Option<AudioFrame> {
    match capture {
        Some(capture) => capture.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn next_vision_frame(vision: &mut Option<VisionSampler>) -> Option<VisionFrame> {
    match vision {
        Some(vision) => vision.next_frame().await,
        None => std::future::pending().await,
    }
}
