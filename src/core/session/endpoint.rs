//! Endpoint resolution.
//!
//! A session reaches the provider either through an authenticating proxy or
//! directly. Resolution order:
//!
//! 1. an explicit proxy URL, used verbatim
//! 2. a raw API key, sent to the provider as `?key=`
//! 3. an http(s) base URL, with the scheme rewritten to ws(s)
//! 4. an opaque bearer token, sent to the constrained endpoint as `?access_token=`

use std::fmt;

use url::Url;
use zeroize::Zeroize;

use super::base::{SessionError, SessionResult};

/// Provider endpoint for API-key sessions.
pub const DIRECT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Provider endpoint for ephemeral-token sessions.
pub const CONSTRAINED_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContentConstrained";

/// Prefix of provider API keys.
const API_KEY_PREFIX: &str = "AIza";

/// A credential for reaching the provider without a proxy.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    BaseUrl(String),
    Token(String),
}

impl Credential {
    /// Classify a single credential string.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Credential::BaseUrl(raw.to_string())
        } else if raw.starts_with(API_KEY_PREFIX) {
            Credential::ApiKey(raw.to_string())
        } else {
            Credential::Token(raw.to_string())
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Credential::ApiKey(_) => "api_key",
            Credential::BaseUrl(_) => "base_url",
            Credential::Token(_) => "token",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::BaseUrl(url) => write!(f, "BaseUrl({url})"),
            other => write!(f, "{}(<redacted>)", other.kind()),
        }
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        match self {
            Credential::ApiKey(s) | Credential::BaseUrl(s) | Credential::Token(s) => s.zeroize(),
        }
    }
}

/// Where a session connects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Proxy WebSocket URL. Wins over any credential.
    pub proxy_url: Option<String>,
    pub credential: Option<Credential>,
}

impl EndpointConfig {
    pub fn proxy(url: impl Into<String>) -> Self {
        Self {
            proxy_url: Some(url.into()),
            credential: None,
        }
    }

    /// Build from one string: a ws(s) URL is a proxy, anything else a credential.
    pub fn from_credential(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            Self::proxy(trimmed)
        } else {
            Self {
                proxy_url: None,
                credential: Some(Credential::classify(trimmed)),
            }
        }
    }

    /// Whether this endpoint goes through a proxy.
    pub fn is_proxied(&self) -> bool {
        self.proxy_url.is_some()
    }

    /// The WebSocket URL to open.
    pub fn resolve(&self) -> SessionResult<String> {
        if let Some(proxy) = &self.proxy_url {
            if !(proxy.starts_with("ws://") || proxy.starts_with("wss://")) {
                return Err(SessionError::InvalidConfiguration(format!(
                    "proxy URL must use ws:// or wss://: {proxy}"
                )));
            }
            return Ok(proxy.clone());
        }

        match &self.credential {
            Some(Credential::ApiKey(key)) => with_query(DIRECT_LIVE_URL, "key", key),
            Some(Credential::BaseUrl(base)) => rewrite_scheme(base),
            Some(Credential::Token(token)) => {
                with_query(CONSTRAINED_LIVE_URL, "access_token", token)
            }
            None => Err(SessionError::InvalidConfiguration(
                "no proxy URL or credential configured".to_string(),
            )),
        }
    }

    /// Resolved URL with secrets masked, for logs.
    pub fn redacted(&self) -> String {
        match self.resolve() {
            Ok(url) => match Url::parse(&url) {
                Ok(mut parsed) => {
                    let pairs: Vec<(String, String)> = parsed
                        .query_pairs()
                        .map(|(k, v)| {
                            let masked = matches!(k.as_ref(), "key" | "access_token" | "token");
                            (k.into_owned(), if masked { "***".to_string() } else { v.into_owned() })
                        })
                        .collect();
                    if pairs.is_empty() {
                        parsed.set_query(None);
                    } else {
                        parsed.query_pairs_mut().clear().extend_pairs(pairs);
                    }
                    parsed.to_string()
                }
                Err(_) => "<invalid url>".to_string(),
            },
            Err(_) => "<unresolved>".to_string(),
        }
    }
}

fn with_query(base: &str, name: &str, value: &str) -> SessionResult<String> {
    if value.is_empty() {
        return Err(SessionError::InvalidConfiguration(format!(
            "empty {name} credential"
        )));
    }
    let mut url = Url::parse(base)
        .map_err(|e| SessionError::InvalidConfiguration(format!("invalid endpoint {base}: {e}")))?;
    url.query_pairs_mut().append_pair(name, value);
    Ok(url.to_string())
}

fn rewrite_scheme(base: &str) -> SessionResult<String> {
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(SessionError::InvalidConfiguration(format!(
            "base URL must use http:// or https://: {base}"
        )))
    }
}
