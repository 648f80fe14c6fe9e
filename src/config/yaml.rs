use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{AppConfig, AuthToken, ConfigError, ConfigResult};

/// Complete YAML configuration structure
///
/// Every field is optional. Values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8787
///   cors_allowed_origins: "*"
///
/// upstream:
///   api_key: "AIza..."
///   live_url: "wss://generativelanguage.googleapis.com/ws/..."
///   rest_url: "https://generativelanguage.googleapis.com/v1beta"
///   vision_model: "gemini-3-flash-preview"
///   token_url: "https://generativelanguage.googleapis.com/v1alpha"
///   token_uses: 100
///   extra_instructions: "Keep answers under two sentences."
///
/// auth:
///   required: true
///   tokens:
///     - id: "kiosk"
///       secret: "your-token"
///
/// limits:
///   rate_limit_per_minute: 30
///   rate_limit_burst: 10
///   session_budget_secs: 3600
///
/// session:
///   endpoint: "wss://edge.example.com/ws?token=..."
///   model: "models/gemini-2.0-flash-live-001"
///   voice: "Puck"
///   system_instruction: "You are a tour guide."
///
/// media:
///   vision_interval_ms: 1000
///   jpeg_quality: 70
///   max_dimension: 768
///   frame_samples: 4096
///   panorama_path: "assets/panorama.jpg"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub auth: Option<AuthYaml>,
    pub limits: Option<LimitsYaml>,
    pub session: Option<SessionYaml>,
    pub media: Option<MediaYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_allowed_origins: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub api_key: Option<String>,
    pub live_url: Option<String>,
    pub rest_url: Option<String>,
    pub vision_model: Option<String>,
    pub token_url: Option<String>,
    pub token_uses: Option<u32>,
    pub extra_instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    /// Replaces any tokens from the environment when non-empty
    #[serde(default)]
    pub tokens: Vec<AuthTokenYaml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokenYaml {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LimitsYaml {
    pub rate_limit_per_minute: Option<u32>,
    pub rate_limit_burst: Option<u32>,
    pub session_budget_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MediaYaml {
    pub vision_interval_ms: Option<u64>,
    pub jpeg_quality: Option<u8>,
    pub max_dimension: Option<u32>,
    pub frame_samples: Option<usize>,
    pub panorama_path: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Overwrite every value this file sets.
    pub(super) fn apply(self, config: &mut AppConfig) {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if server.cors_allowed_origins.is_some() {
                config.cors_allowed_origins = server.cors_allowed_origins;
            }
        }

        if let Some(upstream) = self.upstream {
            if upstream.api_key.is_some() {
                config.upstream_api_key = upstream.api_key;
            }
            if let Some(url) = upstream.live_url {
                config.upstream_live_url = url;
            }
            if let Some(url) = upstream.rest_url {
                config.upstream_rest_url = url;
            }
            if let Some(model) = upstream.vision_model {
                config.vision_model = model;
            }
            if let Some(url) = upstream.token_url {
                config.upstream_token_url = url;
            }
            if let Some(uses) = upstream.token_uses {
                config.ephemeral_token_uses = uses;
            }
            if upstream.extra_instructions.is_some() {
                config.extra_instructions = upstream.extra_instructions;
            }
        }

        if let Some(auth) = self.auth {
            if let Some(required) = auth.required {
                config.auth_required = required;
            }
            if !auth.tokens.is_empty() {
                config.auth_tokens = auth
                    .tokens
                    .into_iter()
                    .map(|t| AuthToken {
                        id: t.id,
                        secret: t.secret,
                    })
                    .collect();
            }
        }

        if let Some(limits) = self.limits {
            if let Some(rate) = limits.rate_limit_per_minute {
                config.rate_limit_per_minute = rate;
            }
            if let Some(burst) = limits.rate_limit_burst {
                config.rate_limit_burst = burst;
            }
            if let Some(budget) = limits.session_budget_secs {
                config.session_budget_secs = budget;
            }
        }

        if let Some(session) = self.session {
            if session.endpoint.is_some() {
                config.session_endpoint = session.endpoint;
            }
            if let Some(model) = session.model {
                config.model = model;
            }
            if session.voice.is_some() {
                config.voice = session.voice;
            }
            if session.system_instruction.is_some() {
                config.system_instruction = session.system_instruction;
            }
        }

        if let Some(media) = self.media {
            if let Some(interval) = media.vision_interval_ms {
                config.vision_interval_ms = interval;
            }
            if let Some(quality) = media.jpeg_quality {
                config.vision_jpeg_quality = quality;
            }
            if let Some(dimension) = media.max_dimension {
                config.vision_max_dimension = dimension;
            }
            if let Some(samples) = media.frame_samples {
                config.capture_frame_samples = samples;
            }
            if let Some(path) = media.panorama_path {
                config.panorama_path = Some(PathBuf::from(path));
            }
        }
    }
}
