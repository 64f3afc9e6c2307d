//! JSON status handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use strum::IntoEnumIterator;

use super::super::types::{
    AppState, BreakerStatus, CacheCounts, LabelledCount, QueryCounts, StatusResponse,
};
use crate::error_handling::{ErrorType, InfoType};

/// JSON status endpoint: query totals, cache ratio, error counts, pool and breakers
pub async fn status_handler(State(state): State<AppState>) -> Response {
    let services = state.orchestrator.services();
    let stats = &services.stats;

    let total = stats.total_requests();
    let successful = stats.successful_requests();
    let errors = ErrorType::iter()
        .map(|error_type| LabelledCount {
            label: error_type.metric_label(),
            count: stats.get_error_count(error_type),
        })
        .filter(|entry| entry.count > 0)
        .collect();
    let breakers = services
        .manager
        .providers()
        .iter()
        .map(|provider| BreakerStatus {
            provider: provider.kind().name().to_string(),
            state: provider.breaker().state().as_str(),
            consecutive_failures: provider.breaker().failure_count(),
        })
        .collect();

    let response = StatusResponse {
        uptime_seconds: stats.uptime_seconds() as u64,
        store_backend: services.store.backend(),
        queries: QueryCounts {
            total,
            successful,
            failed: total.saturating_sub(successful),
        },
        cache: CacheCounts {
            hits: stats.get_info_count(InfoType::CacheHit),
            misses: stats.get_info_count(InfoType::CacheMiss),
            hit_ratio: stats.cache_hit_ratio(),
        },
        errors,
        pool: services.pool.snapshot(),
        breakers,
    };

    let json = match serde_json::to_string_pretty(&response) {
        Ok(json) => json,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialize status: {}", e),
            )
                .into_response();
        }
    };

    (StatusCode::OK, [("content-type", "application/json")], json).into_response()
}
