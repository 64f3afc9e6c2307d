//! Query, DNS and token handlers.

use std::future::Future;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::super::identity::ClientIdentity;
use super::super::types::{AppState, ErrorBody};
use crate::context::RequestContext;
use crate::error_handling::QueryError;

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Runs `work` with a fresh request context.
///
/// If the client disconnects, axum drops this future before it completes and
/// the context is cancelled, which aborts the request's in-flight upstream calls.
async fn with_context<T, F, Fut>(state: &AppState, identity: ClientIdentity, work: F) -> Response
where
    T: IntoResponse,
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = Result<T, QueryError>>,
{
    let config = &state.orchestrator.services().config;
    let ctx = RequestContext::new(identity.0, config.compare_timeout().max(config.whois_timeout()));
    let cancel_on_disconnect = ctx.cancellation_token().clone().drop_guard();
    let request_id = ctx.request_id().to_string();

    let response = match work(ctx).await {
        Ok(value) => value.into_response(),
        Err(e) => e.into_response(),
    };
    let _ = cancel_on_disconnect.disarm();

    let mut response = response;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// `GET /api/v1/whois/{domain}`
pub async fn whois_handler(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(domain): Path<String>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    with_context(&state, identity, |ctx| async move {
        let outcome = orchestrator.query_domain(&ctx, &domain).await?;
        let cache_header = if outcome.from_cache { "HIT" } else { "MISS" };
        Ok(([("x-cache", cache_header)], Json(outcome.record)))
    })
    .await
}

/// `GET /api/v1/whois/{domain}/compare`
pub async fn compare_handler(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(domain): Path<String>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    with_context(&state, identity, |ctx| async move {
        orchestrator.compare_domain(&ctx, &domain).await.map(Json)
    })
    .await
}

/// `GET /api/v1/dns/{domain}`
pub async fn dns_handler(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(domain): Path<String>,
) -> Response {
    let orchestrator = state.orchestrator.clone();
    with_context(&state, identity, |ctx| async move {
        orchestrator.lookup_dns(&ctx, &domain).await.map(Json)
    })
    .await
}

/// `POST /api/v1/token`
pub async fn token_handler(State(state): State<AppState>, identity: ClientIdentity) -> Response {
    let orchestrator = state.orchestrator.clone();
    with_context(&state, identity, |ctx| async move {
        orchestrator.issue_token(&ctx).await.map(Json)
    })
    .await
}

/// `GET /health`
///
/// Liveness only: a store outage is reported but still answers 200, since
/// queries keep working (fail-open) without it.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let store = &state.orchestrator.services().store;
    let store_status = match store.ping().await {
        Ok(()) => "ok",
        Err(e) => {
            log::warn!("Health check: {} store unavailable: {e}", store.backend());
            "unavailable"
        }
    };
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "store": store_status })),
    )
        .into_response()
}
