//! Realtime agent session.
//!
//! A session is one persistent WebSocket carrying JSON frames both ways:
//! microphone audio, vision frames, text and tool results out; agent audio,
//! text, tool calls and control signals in.
//!
//! # Audio Format
//!
//! - Outbound: PCM 16-bit signed little-endian, mono, 16 kHz
//! - Inbound: PCM 16-bit signed little-endian, mono, 24 kHz unless the
//!   mime type says otherwise

mod base;
mod endpoint;
pub mod messages;
mod transport;

pub use base::{
    ConnectionState, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MODEL, SessionConfig, SessionError,
    SessionResult, TurnState,
};
pub use endpoint::{CONSTRAINED_LIVE_URL, Credential, DIRECT_LIVE_URL, EndpointConfig};
pub use messages::{
    ClientMessage, InboundEnvelope, OutboundEnvelope, SetupRequest, TranscriptSource,
    decode_server_message,
};
pub use transport::{SessionTransport, TransportEvent, TransportEvents};
