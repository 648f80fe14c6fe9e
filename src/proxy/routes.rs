use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::auth::{ClientIdentity, auth_middleware, rate_limit_middleware};
use super::error::ProxyError;
use super::relay::{RelayContext, connect_upstream, relay};
use super::state::ProxyState;
use super::token::token_handler;
use super::vision::vision_handler;

/// Build the proxy router.
///
/// Layer order (outer to inner): auth -> rate limit -> handler. `/health` is
/// public.
pub fn router(state: Arc<ProxyState>) -> Router {
    let cors = cors_layer(state.config.cors_allowed_origins.as_deref());

    let protected = Router::new()
        .route("/ws", get(ws_handler))
        .route("/token", get(token_handler))
        .route("/vision", post(vision_handler))
        .route("/log", post(log_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let headers = [AUTHORIZATION, CONTENT_TYPE];

    match origins {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(methods)
                .allow_headers(headers)
                .allow_credentials(true)
        }
        None => {
            tracing::info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            CorsLayer::new().allow_methods(methods).allow_headers(headers)
        }
    }
}

/// WebSocket relay endpoint
///
/// Checks run in order: upgrade headers, budget, upstream connect. Budget and
/// upstream rejections happen before the upgrade so the client sees a plain
/// HTTP status instead of a 101.
pub async fn ws_handler(
    State(state): State<Arc<ProxyState>>,
    Extension(identity): Extension<ClientIdentity>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let identity = identity.0;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(auth_id = %identity, "Not a WebSocket upgrade: {}", rejection);
            return rejection.into_response();
        }
    };

    if state.budgets.is_exhausted(&identity) {
        tracing::warn!(auth_id = %identity, "Rejecting session: budget exhausted");
        return ProxyError::BudgetExhausted(identity).into_response();
    }

    let upstream = match connect_upstream(&state.config).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(auth_id = %identity, "Upstream connect failed: {}", e);
            return e.into_response();
        }
    };

    // Another session may have spent the rest while the upstream connected
    let Some(lease) = state.budgets.admit(&identity) else {
        tracing::warn!(auth_id = %identity, "Rejecting session: budget exhausted");
        return ProxyError::BudgetExhausted(identity).into_response();
    };

    let ctx = RelayContext {
        identity: identity.clone(),
        extra_instructions: state.config.extra_instructions.clone(),
    };
    tracing::info!(
        auth_id = %identity,
        remaining = ?state.budgets.remaining(&identity),
        open_sessions = state.budgets.open_sessions(&identity),
        "Relay session starting"
    );

    upgrade.on_upgrade(move |socket| async move {
        let elapsed = relay(socket, upstream, ctx, lease).await;
        tracing::info!(
            auth_id = %identity,
            elapsed_ms = elapsed.as_millis() as u64,
            used_ms = state.budgets.used(&identity).as_millis() as u64,
            "Relay session ended"
        );
    })
}

/// Remote log sink for device clients
pub async fn log_handler(
    Extension(identity): Extension<ClientIdentity>,
    Json(body): Json<Value>,
) -> Json<Value> {
    match body.get("message").and_then(Value::as_str) {
        Some(message) => tracing::info!(auth_id = %identity.as_str(), "[client] {}", message),
        None => tracing::info!(auth_id = %identity.as_str(), "[client] {}", body),
    }
    Json(json!({ "status": "ok" }))
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
