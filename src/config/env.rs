use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use super::{AppConfig, AuthToken, ConfigError, ConfigResult};

/// Identity given to the single-token `AUTH_TOKEN` form when no id is set.
const DEFAULT_TOKEN_ID: &str = "default";

#[derive(Deserialize)]
struct TokenEntry {
    id: String,
    secret: String,
}

/// Build a configuration from environment variables over defaults.
pub(super) fn load() -> ConfigResult<AppConfig> {
    let mut config = AppConfig::default();

    if let Some(host) = string("HOST") {
        config.host = host;
    }
    if let Some(port) = parse("PORT")? {
        config.port = port;
    }
    config.cors_allowed_origins = string("CORS_ALLOWED_ORIGINS");

    config.upstream_api_key = string("GEMINI_API_KEY");
    if let Some(url) = string("UPSTREAM_LIVE_URL") {
        config.upstream_live_url = url;
    }
    if let Some(url) = string("UPSTREAM_REST_URL") {
        config.upstream_rest_url = url;
    }
    if let Some(model) = string("VISION_MODEL") {
        config.vision_model = model;
    }
    if let Some(url) = string("UPSTREAM_TOKEN_URL") {
        config.upstream_token_url = url;
    }
    if let Some(uses) = parse("EPHEMERAL_TOKEN_USES")? {
        config.ephemeral_token_uses = uses;
    }
    config.extra_instructions = string("PROXY_EXTRA_INSTRUCTIONS");

    config.auth_tokens = auth_tokens()?;
    if let Some(required) = boolean("AUTH_REQUIRED")? {
        config.auth_required = required;
    }

    if let Some(rate) = parse("RATE_LIMIT_PER_MINUTE")? {
        config.rate_limit_per_minute = rate;
    }
    if let Some(burst) = parse("RATE_LIMIT_BURST")? {
        config.rate_limit_burst = burst;
    }
    if let Some(budget) = parse("SESSION_BUDGET_SECONDS")? {
        config.session_budget_secs = budget;
    }

    config.session_endpoint = string("LIVESCAPE_ENDPOINT");
    if let Some(model) = string("LIVE_MODEL") {
        config.model = model;
    }
    config.voice = string("LIVE_VOICE");
    config.system_instruction = string("SYSTEM_INSTRUCTION");

    if let Some(interval) = parse("VISION_INTERVAL_MS")? {
        config.vision_interval_ms = interval;
    }
    if let Some(quality) = parse("VISION_JPEG_QUALITY")? {
        config.vision_jpeg_quality = quality;
    }
    if let Some(dimension) = parse("VISION_MAX_DIMENSION")? {
        config.vision_max_dimension = dimension;
    }
    if let Some(samples) = parse("CAPTURE_FRAME_SAMPLES")? {
        config.capture_frame_samples = samples;
    }
    config.panorama_path = string("PANORAMA_PATH").map(PathBuf::from);

    Ok(config)
}

/// `AUTH_TOKENS_JSON` wins; otherwise the single `AUTH_TOKEN` (+ `AUTH_TOKEN_ID`).
fn auth_tokens() -> ConfigResult<Vec<AuthToken>> {
    if let Some(json) = string("AUTH_TOKENS_JSON") {
        let entries: Vec<TokenEntry> =
            serde_json::from_str(&json).map_err(|e| ConfigError::InvalidValue {
                name: "AUTH_TOKENS_JSON".to_string(),
                reason: e.to_string(),
            })?;
        if !entries.is_empty() {
            return Ok(entries
                .into_iter()
                .map(|e| AuthToken {
                    id: e.id,
                    secret: e.secret,
                })
                .collect());
        }
    }

    Ok(string("AUTH_TOKEN")
        .map(|secret| {
            vec![AuthToken {
                id: string("AUTH_TOKEN_ID").unwrap_or_else(|| DEFAULT_TOKEN_ID.to_string()),
                secret,
            }]
        })
        .unwrap_or_default())
}

/// Non-empty trimmed value of `name`.
fn string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T>(name: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    string(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                reason: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

fn boolean(name: &str) -> ConfigResult<Option<bool>> {
    string(name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: name.to_string(),
                reason: format!("'{raw}' is not a boolean"),
            }),
        })
        .transpose()
}
