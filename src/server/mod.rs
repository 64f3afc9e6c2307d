//! HTTP surface.
//!
//! Routes:
//! - `GET /api/v1/whois/{domain}` - best-result registration lookup
//! - `GET /api/v1/whois/{domain}/compare` - every provider side by side
//! - `GET /api/v1/dns/{domain}` - A/AAAA/MX/NS/TXT records
//! - `POST /api/v1/token` - API token issuance
//! - `GET /status` - JSON counters, pool and breaker state
//! - `GET /metrics` - Prometheus text
//! - `GET /health` - liveness
//!
//! Handlers are thin: they build a request context, call the orchestrator and
//! map `QueryError` to its status code.

mod handlers;
mod identity;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;

use crate::config::Config;
use crate::orchestrator::{RequestOrchestrator, Services};

use handlers::{
    compare_handler, dns_handler, health_handler, metrics_handler, status_handler, token_handler,
    whois_handler,
};
pub use identity::ClientIdentity;
pub use types::{AppState, ErrorBody, StatusResponse};

/// Builds the router over an orchestrator.
pub fn router(orchestrator: RequestOrchestrator) -> Router {
    Router::new()
        .route("/api/v1/whois/{domain}", get(whois_handler))
        .route("/api/v1/whois/{domain}/compare", get(compare_handler))
        .route("/api/v1/dns/{domain}", get(dns_handler))
        .route("/api/v1/token", post(token_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { orchestrator })
}

/// Serves `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("HTTP server error")
}

/// Builds all services and serves the API until Ctrl-C.
///
/// On shutdown the listener stops accepting, in-flight requests finish, then
/// the worker pool is drained and its workers joined.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen = config.listen;
    let services = Arc::new(Services::init(config).await?);
    let app = router(RequestOrchestrator::new(services.clone()));

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {listen}"))?;

    log::info!("Listening on http://{listen}/");
    log::info!("  - Query:   http://{listen}/api/v1/whois/{{domain}}");
    log::info!("  - Status:  http://{listen}/status");
    log::info!("  - Metrics: http://{listen}/metrics");

    serve(listener, app, shutdown_signal()).await?;
    services.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received Ctrl-C, shutting down"),
        Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::QueryError;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_query_error_response_carries_code() {
        let response = QueryError::PoolSaturated.into_response();
        assert_eq!(response.status().as_u16(), 429);

        let response = QueryError::Cancelled.into_response();
        assert_eq!(response.status().as_u16(), 499);
    }
}
