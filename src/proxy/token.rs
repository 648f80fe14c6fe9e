//! `GET /token`: mint a short-lived provider token for direct device sessions.
//!
//! The device connects to the provider's constrained endpoint with the minted
//! token as `access_token`; the API key never leaves the proxy.

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::ClientIdentity;
use super::error::{ProxyError, ProxyResult};
use super::state::ProxyState;

/// Provider reply to an auth token request.
#[derive(Debug, Deserialize)]
struct AuthTokenResponse {
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

pub async fn token_handler(
    State(state): State<Arc<ProxyState>>,
    Extension(identity): Extension<ClientIdentity>,
) -> ProxyResult<Json<TokenResponse>> {
    let api_key = state
        .config
        .upstream_api_key
        .as_deref()
        .ok_or_else(|| ProxyError::NotConfigured("no upstream API key".to_string()))?;

    let url = format!(
        "{}/auth_tokens",
        state.config.upstream_token_url.trim_end_matches('/')
    );
    let response = state
        .http
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&json!({ "uses": state.config.ephemeral_token_uses }))
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        tracing::error!(auth_id = %identity.as_str(), status = %status, "Token request failed: {}", detail);
        return Err(ProxyError::Upstream(format!(
            "Token request failed: provider returned {status}"
        )));
    }

    let minted: AuthTokenResponse = response
        .json()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Token request failed: {e}")))?;
    let token = minted
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProxyError::Upstream("Token request failed: no token in reply".to_string()))?;

    tracing::info!(
        auth_id = %identity.as_str(),
        uses = state.config.ephemeral_token_uses,
        "Minted ephemeral token"
    );
    Ok(Json(TokenResponse { token }))
}
