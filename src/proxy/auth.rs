use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use super::error::ProxyError;
use super::state::ProxyState;
use crate::config::AuthToken;

/// Identity used when authentication is disabled.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// Authenticated client identity, inserted into request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Id of the token matching `presented`.
///
/// Every configured secret is compared in constant time, and the scan does
/// not stop at the first match.
pub fn match_token<'a>(tokens: &'a [AuthToken], presented: &str) -> Option<&'a str> {
    let mut matched = None;
    for token in tokens {
        let equal: bool = token.secret.as_bytes().ct_eq(presented.as_bytes()).into();
        if equal && matched.is_none() {
            matched = Some(token.id.as_str());
        }
    }
    matched
}

/// Extract authentication token from request
///
/// 1. Authorization header: `Authorization: Bearer <token>` (preferred)
/// 2. Query parameter: `?token=<token>` (for WebSocket upgrades from browsers)
pub(crate) fn extract_token(request: &Request) -> Result<String, ProxyError> {
    if let Some(auth_header) = request.headers().get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| ProxyError::InvalidAuthHeader)?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            tracing::debug!("Token extracted from Authorization header");
            return Ok(token.trim().to_string());
        }
        return Err(ProxyError::InvalidAuthHeader);
    }

    if let Some(query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "token" {
                tracing::debug!("Token extracted from query parameter");
                return Ok(value.to_string());
            }
        }
    }

    Err(ProxyError::MissingToken)
}

/// Authentication middleware
///
/// Resolves the presented token to a [`ClientIdentity`] and rejects the
/// request with 401 when it is missing or unknown.
pub async fn auth_middleware(
    State(state): State<Arc<ProxyState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    if !state.config.auth_required {
        request
            .extensions_mut()
            .insert(ClientIdentity(ANONYMOUS_IDENTITY.to_string()));
        return Ok(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    let token = extract_token(&request).inspect_err(|e| {
        tracing::warn!(path = %path, "Authentication failed: {}", e);
    })?;

    match state.config.find_token_id(&token) {
        Some(id) => {
            tracing::debug!(path = %path, auth_id = %id, "Authentication successful");
            request
                .extensions_mut()
                .insert(ClientIdentity(id.to_string()));
            Ok(next.run(request).await)
        }
        None => {
            tracing::warn!(path = %path, "Authentication failed: token mismatch");
            Err(ProxyError::InvalidToken)
        }
    }
}

/// Per-identity rate limit. Runs after [`auth_middleware`].
pub async fn rate_limit_middleware(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let identity = request
        .extensions()
        .get::<ClientIdentity>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());

    if state.limiter.check_key(&identity).is_err() {
        tracing::warn!(auth_id = %identity, path = %request.uri().path(), "Rate limit exceeded");
        return Err(ProxyError::RateLimited);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn tokens() -> Vec<AuthToken> {
        vec![
            AuthToken {
                id: "kiosk".into(),
                secret: "alpha".into(),
            },
            AuthToken {
                id: "phone".into(),
                secret: "beta".into(),
            },
        ]
    }

    #[test]
    fn test_match_token() {
        let tokens = tokens();
        assert_eq!(match_token(&tokens, "beta"), Some("phone"));
        assert_eq!(match_token(&tokens, "alpha"), Some("kiosk"));
        assert_eq!(match_token(&tokens, "alph"), None);
        assert_eq!(match_token(&tokens, ""), None);
        assert_eq!(match_token(&[], "alpha"), None);
    }

    #[test]
    fn test_extract_token_from_header() {
        let request = Request::builder()
            .uri("/vision")
            .header("authorization", "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&request).unwrap(), "abc");
    }

    #[test]
    fn test_extract_token_from_query() {
        let request = Request::builder()
            .uri("/ws?foo=1&token=a%2Fb")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_token(&request).unwrap(), "a/b");
    }

    #[test]
    fn test_extract_token_rejects_other_schemes() {
        let request = Request::builder()
            .uri("/ws?token=ignored")
            .header("authorization", "Basic abc")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            extract_token(&request),
            Err(ProxyError::InvalidAuthHeader)
        ));
    }

    #[test]
    fn test_extract_token_missing() {
        let request = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        assert!(matches!(extract_token(&request), Err(ProxyError::MissingToken)));
    }
}
