//! One-shot scene description through the edge proxy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::DescribeError;
use super::sampler::VisionFrame;

pub const DEFAULT_PROMPT: &str = "Describe this scene.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST /vision`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescribeRequest {
    /// Base64 JPEG
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Response of `POST /vision`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescribeResponse {
    pub text: String,
}

/// Client for the proxy's scene description endpoint.
#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl std::fmt::Debug for VisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl VisionClient {
    /// `base_url` is the proxy's HTTP origin; a ws(s) URL is accepted and
    /// mapped to http(s).
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, DescribeError> {
        let endpoint = vision_endpoint(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Ask for a description of `frame`. `None` uses [`DEFAULT_PROMPT`].
    pub async fn describe(
        &self,
        frame: &VisionFrame,
        prompt: Option<&str>,
    ) -> Result<String, DescribeError> {
        let body = DescribeRequest {
            image: Some(frame.to_base64()),
            prompt: Some(prompt.unwrap_or(DEFAULT_PROMPT).to_string()),
        };

        let mut request = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DescribeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let described: DescribeResponse = response.json().await?;
        tracing::debug!(chars = described.text.len(), "Scene description received");
        Ok(described.text)
    }
}

fn vision_endpoint(base_url: &str) -> Result<Url, DescribeError> {
    let mut url =
        Url::parse(base_url.trim()).map_err(|e| DescribeError::InvalidUrl(format!("{base_url}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => {
            return Err(DescribeError::InvalidUrl(format!(
                "unsupported scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| DescribeError::InvalidUrl(base_url.to_string()))?;
    url.set_path("/vision");
    url.set_query(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_http_origin() {
        let client = VisionClient::new("http://127.0.0.1:8787", None).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:8787/vision");
    }

    #[test]
    fn test_endpoint_from_socket_url() {
        let client =
            VisionClient::new("wss://edge.example.com/ws?token=abc", Some("abc".into())).unwrap();
        assert_eq!(client.endpoint(), "https://edge.example.com/vision");
        assert!(!format!("{client:?}").contains("abc\""));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(matches!(
            VisionClient::new("ftp://example.com", None),
            Err(DescribeError::InvalidUrl(_))
        ));
        assert!(VisionClient::new("not a url", None).is_err());
    }

    #[test]
    fn test_request_fields_optional() {
        let parsed: DescribeRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.image, None);
        assert_eq!(parsed.prompt, None);
    }
}
