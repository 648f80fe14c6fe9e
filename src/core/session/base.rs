//! Base types for the realtime agent session.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::endpoint::EndpointConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while establishing or using a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The duplex connection could not be established. Never retried.
    #[error("Connection failed: {reason}")]
    Connection {
        reason: String,
        /// HTTP status when the upgrade was rejected
        status: Option<u16>,
    },

    /// An inbound frame could not be decoded
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// A session is already open on this transport
    #[error("Already connected")]
    AlreadyConnected,
}

impl SessionError {
    pub fn connection(reason: impl Into<String>) -> Self {
        SessionError::Connection {
            reason: reason.into(),
            status: None,
        }
    }

    /// HTTP status of a rejected upgrade, if that is why connecting failed.
    pub fn upgrade_status(&self) -> Option<u16> {
        match self {
            SessionError::Connection { status, .. } => *status,
            _ => None,
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Configuration Types
// =============================================================================

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Where to connect and how to authenticate
    pub endpoint: EndpointConfig,
    /// Model name. A missing `models/` prefix is added.
    pub model: String,
    pub system_instruction: Option<String>,
    /// Function declarations advertised in the setup
    pub tools: Vec<Value>,
    /// Requested output modalities, e.g. `AUDIO` or `TEXT`
    pub response_modalities: Vec<String>,
    /// Prebuilt voice for audio output
    pub voice: Option<String>,
    /// Handle of a previous session to resume
    pub resume_handle: Option<String>,
    /// Request transcripts of user and agent speech
    pub transcription: bool,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            tools: Vec::new(),
            response_modalities: vec!["AUDIO".to_string()],
            voice: None,
            resume_handle: None,
            transcription: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Model name in the `models/...` form the wire protocol expects.
    pub fn qualified_model(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}

// =============================================================================
// State Types
// =============================================================================

/// Session connection state.
///
/// `Disconnected → Connecting → AwaitingSetupAck → Active ⇄ Interrupted →
/// Closing → Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Opening the duplex connection
    Connecting,
    /// Upgraded, setup not yet written
    AwaitingSetupAck,
    /// Accepting outbound traffic
    Active,
    /// The agent's current turn was interrupted
    Interrupted,
    /// Tearing down
    Closing,
}

impl ConnectionState {
    /// Whether outbound envelopes reach the wire in this state.
    pub fn accepts_sends(self) -> bool {
        matches!(self, ConnectionState::Active | ConnectionState::Interrupted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::AwaitingSetupAck => write!(f, "AwaitingSetupAck"),
            ConnectionState::Active => write!(f, "Active"),
            ConnectionState::Interrupted => write!(f, "Interrupted"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

/// Where the agent is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    AgentSpeaking,
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::AwaitingSetupAck.to_string(), "AwaitingSetupAck");
        assert_eq!(ConnectionState::Interrupted.to_string(), "Interrupted");
    }

    #[test]
    fn test_only_active_states_accept_sends() {
        assert!(ConnectionState::Active.accepts_sends());
        assert!(ConnectionState::Interrupted.accepts_sends());
        assert!(!ConnectionState::Disconnected.accepts_sends());
        assert!(!ConnectionState::Connecting.accepts_sends());
        assert!(!ConnectionState::AwaitingSetupAck.accepts_sends());
        assert!(!ConnectionState::Closing.accepts_sends());
    }

    #[test]
    fn test_qualified_model() {
        let mut config = SessionConfig {
            model: "gemini-live".to_string(),
            ..Default::default()
        };
        assert_eq!(config.qualified_model(), "models/gemini-live");
        config.model = "models/gemini-live".to_string();
        assert_eq!(config.qualified_model(), "models/gemini-live");
    }

    #[test]
    fn test_upgrade_status() {
        let err = SessionError::Connection {
            reason: "rejected".to_string(),
            status: Some(401),
        };
        assert_eq!(err.upgrade_status(), Some(401));
        assert_eq!(SessionError::NotConnected.upgrade_status(), None);
        assert!(err.to_string().contains("rejected"));
    }
}
