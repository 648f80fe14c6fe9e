use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Rejections and failures returned by the proxy.
///
/// Every rejection of a WebSocket request happens before the upgrade, so
/// clients see it as a plain HTTP status.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid Authorization header")]
    InvalidAuthHeader,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Session time budget exhausted for {0}")]
    BudgetExhausted(String),

    #[error("{0}")]
    BadRequest(String),

    /// The provider could not be reached or failed
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Proxy not configured: {0}")]
    NotConfigured(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MissingToken | ProxyError::InvalidAuthHeader | ProxyError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BudgetExhausted(_) => StatusCode::FORBIDDEN,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
