//! `POST /vision`: one-shot scene description through the provider's REST API.

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use serde_json::json;

use super::auth::ClientIdentity;
use super::error::{ProxyError, ProxyResult};
use super::state::ProxyState;
use crate::core::vision::{DEFAULT_PROMPT, DescribeRequest, DescribeResponse};

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Describe a base64 JPEG with the configured vision model.
pub async fn vision_handler(
    State(state): State<Arc<ProxyState>>,
    Extension(identity): Extension<ClientIdentity>,
    Json(request): Json<DescribeRequest>,
) -> ProxyResult<Json<DescribeResponse>> {
    let image = request
        .image
        .as_deref()
        .map(strip_data_url)
        .filter(|image| !image.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("Missing image data".to_string()))?;
    let prompt = request
        .prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_PROMPT);

    let api_key = state
        .config
        .upstream_api_key
        .as_deref()
        .ok_or_else(|| ProxyError::NotConfigured("no upstream API key".to_string()))?;

    let url = format!(
        "{}/models/{}:generateContent",
        state.config.upstream_rest_url.trim_end_matches('/'),
        state.config.vision_model
    );
    let body = json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inline_data": { "mime_type": "image/jpeg", "data": image } }
            ]
        }]
    });

    let response = state
        .http
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Vision proxy failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        tracing::error!(auth_id = %identity.as_str(), status = %status, "Vision request failed: {}", detail);
        return Err(ProxyError::Upstream(format!(
            "Vision proxy failed: provider returned {status}"
        )));
    }

    let generated: GenerateResponse = response
        .json()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Vision proxy failed: {e}")))?;
    let text = first_candidate_text(&generated);

    tracing::info!(auth_id = %identity.as_str(), chars = text.len(), "Processed vision request");
    Ok(Json(DescribeResponse { text }))
}

/// Accept `data:image/jpeg;base64,...` as well as bare base64.
fn strip_data_url(image: &str) -> &str {
    let image = image.trim();
    match image.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => image,
    }
}

fn first_candidate_text(response: &GenerateResponse) -> String {
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}
