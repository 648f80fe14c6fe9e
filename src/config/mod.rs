//! Configuration for the edge proxy and the live session client.
//!
//! Sources, highest priority first: YAML file, environment variables,
//! `.env` values (loaded into the environment by `main`), defaults.
//!
//! # Example
//! ```rust,no_run
//! use livescape::config::AppConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env()?;
//! let config = AppConfig::from_file(&PathBuf::from("livescape.yaml"))?;
//! println!("Proxy listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use zeroize::Zeroize;

use crate::core::audio::CaptureConfig;
use crate::core::session::{DEFAULT_MODEL, DIRECT_LIVE_URL, EndpointConfig, SessionConfig};
use crate::core::vision::VisionConfig;

mod env;
mod yaml;

pub use yaml::YamlConfig;

pub const DEFAULT_REST_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_VISION_MODEL: &str = "gemini-3-flash-preview";
/// Ephemeral auth tokens are only served by the alpha API
pub const DEFAULT_TOKEN_URL: &str = "https://generativelanguage.googleapis.com/v1alpha";
pub const DEFAULT_TOKEN_USES: u32 = 100;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Configuration
// =============================================================================

/// A client credential accepted by the proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    /// Identity used for rate limiting and session budgets
    pub id: String,
    pub secret: String,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    // Proxy server
    pub host: String,
    pub port: u16,
    /// Comma-separated origins, or `*`. `None` allows same-origin only.
    pub cors_allowed_origins: Option<String>,

    // Upstream provider
    pub upstream_api_key: Option<String>,
    /// Live WebSocket endpoint the proxy relays to
    pub upstream_live_url: String,
    /// REST base used for scene descriptions
    pub upstream_rest_url: String,
    pub vision_model: String,
    /// REST base that mints ephemeral client tokens
    pub upstream_token_url: String,
    /// How many sessions one minted token may open
    pub ephemeral_token_uses: u32,
    /// Appended to the system instruction of every relayed session
    pub extra_instructions: Option<String>,

    // Client authentication
    pub auth_tokens: Vec<AuthToken>,
    pub auth_required: bool,

    // Limits
    /// Requests per identity per minute, WebSocket upgrades included
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    /// Cumulative relayed session time per identity. Zero disables the budget.
    pub session_budget_secs: u64,

    // Session client
    /// Proxy URL or provider credential for `livescape session`
    pub session_endpoint: Option<String>,
    pub model: String,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,

    // Media
    pub vision_interval_ms: u64,
    pub vision_jpeg_quality: u8,
    pub vision_max_dimension: u32,
    pub capture_frame_samples: usize,
    /// Still image used as the frame source in headless sessions
    pub panorama_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            cors_allowed_origins: None,
            upstream_api_key: None,
            upstream_live_url: DIRECT_LIVE_URL.to_string(),
            upstream_rest_url: DEFAULT_REST_URL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            upstream_token_url: DEFAULT_TOKEN_URL.to_string(),
            ephemeral_token_uses: DEFAULT_TOKEN_USES,
            extra_instructions: None,
            auth_tokens: Vec::new(),
            auth_required: true,
            rate_limit_per_minute: 30,
            rate_limit_burst: 10,
            session_budget_secs: 3600,
            session_endpoint: None,
            model: DEFAULT_MODEL.to_string(),
            voice: None,
            system_instruction: None,
            vision_interval_ms: 1000,
            vision_jpeg_quality: 70,
            vision_max_dimension: 768,
            capture_frame_samples: 4096,
            panorama_path: None,
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("upstream_live_url", &self.upstream_live_url)
            .field("upstream_api_key", &self.upstream_api_key.as_ref().map(|_| "<redacted>"))
            .field("auth_tokens", &self.auth_tokens)
            .field("auth_required", &self.auth_required)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("session_budget_secs", &self.session_budget_secs)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Zeroize secrets when the configuration is dropped.
impl Drop for AppConfig {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.upstream_api_key {
            key.zeroize();
        }
        if let Some(ref mut endpoint) = self.session_endpoint {
            endpoint.zeroize();
        }
        for token in &mut self.auth_tokens {
            token.secret.zeroize();
        }
    }
}

impl AppConfig {
    /// Load from environment variables only.
    pub fn from_env() -> ConfigResult<Self> {
        let config = env::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load environment variables, then apply YAML overrides from `path`.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = env::load()?;
        yaml.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Identity for a presented bearer token.
    pub fn find_token_id(&self, token: &str) -> Option<&str> {
        crate::proxy::auth::match_token(&self.auth_tokens, token)
    }

    pub fn session_budget(&self) -> Duration {
        Duration::from_secs(self.session_budget_secs)
    }

    /// Session settings for `livescape session`.
    pub fn session_config(&self) -> ConfigResult<SessionConfig> {
        let endpoint = self.session_endpoint.as_deref().ok_or_else(|| {
            ConfigError::Validation(
                "LIVESCAPE_ENDPOINT must be set to a proxy URL or provider credential".to_string(),
            )
        })?;
        Ok(SessionConfig {
            endpoint: EndpointConfig::from_credential(endpoint),
            model: self.model.clone(),
            system_instruction: self.system_instruction.clone(),
            voice: self.voice.clone(),
            ..Default::default()
        })
    }

    pub fn vision_config(&self) -> VisionConfig {
        VisionConfig {
            interval: Duration::from_millis(self.vision_interval_ms),
            jpeg_quality: self.vision_jpeg_quality,
            max_dimension: self.vision_max_dimension,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig::with_frame_samples(self.capture_frame_samples)
    }

    /// Checks that hold for every command.
    fn validate(&self) -> ConfigResult<()> {
        if self.rate_limit_per_minute == 0 || self.rate_limit_burst == 0 {
            return Err(ConfigError::Validation(
                "rate limit and burst must be greater than zero".to_string(),
            ));
        }
        if self.ephemeral_token_uses == 0 {
            return Err(ConfigError::Validation(
                "ephemeral token uses must be greater than zero".to_string(),
            ));
        }
        if !(1..=100).contains(&self.vision_jpeg_quality) {
            return Err(ConfigError::Validation(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.vision_jpeg_quality
            )));
        }
        if !(self.upstream_live_url.starts_with("ws://")
            || self.upstream_live_url.starts_with("wss://"))
        {
            return Err(ConfigError::Validation(format!(
                "upstream live URL must use ws:// or wss://: {}",
                self.upstream_live_url
            )));
        }
        Ok(())
    }

    /// Checks only `livescape proxy` needs: the token table.
    pub fn validate_proxy(&self) -> ConfigResult<()> {
        if self.auth_required && self.auth_tokens.is_empty() {
            return Err(ConfigError::Validation(
                "auth is required but no tokens are configured (set AUTH_TOKENS_JSON or AUTH_TOKEN)"
                    .to_string(),
            ));
        }
        for (i, token) in self.auth_tokens.iter().enumerate() {
            if token.id.trim().is_empty() || token.secret.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "auth token #{i} must have a non-empty id and secret"
                )));
            }
            if self.auth_tokens[..i].iter().any(|t| t.id == token.id) {
                return Err(ConfigError::Validation(format!(
                    "duplicate auth token id '{}'",
                    token.id
                )));
            }
        }
        Ok(())
    }
}
