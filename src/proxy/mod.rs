//! Authenticating edge proxy between device clients and the Live provider.

pub mod auth;
pub mod budget;
pub mod error;
pub mod relay;
pub mod routes;
pub mod state;
pub mod token;
pub mod vision;

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;

pub use auth::{ANONYMOUS_IDENTITY, ClientIdentity, match_token};
pub use budget::{BudgetLease, BudgetLedger};
pub use error::{ProxyError, ProxyResult};
pub use relay::{RelayContext, inject_system_instruction};
pub use routes::router;
pub use state::ProxyState;
pub use token::TokenResponse;

use crate::config::AppConfig;

/// Serve the proxy on `listener` until `shutdown` resolves.
pub async fn serve<F>(config: AppConfig, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = ProxyState::new(config);
    let app = router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Edge proxy listening");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
