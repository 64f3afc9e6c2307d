//! Prometheus metrics handler.

use std::fmt::Write;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use strum::IntoEnumIterator;

use super::super::types::AppState;
use crate::circuit_breaker::CircuitState;
use crate::error_handling::{ErrorType, InfoType};

/// Prometheus-compatible metrics endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let services = state.orchestrator.services();
    let stats = &services.stats;
    let pool = services.pool.snapshot();

    let mut metrics = format!(
        r#"# HELP domain_intel_uptime_seconds Seconds since the service started
# TYPE domain_intel_uptime_seconds gauge
domain_intel_uptime_seconds {}

# HELP domain_intel_requests_total Queries received
# TYPE domain_intel_requests_total counter
domain_intel_requests_total {}

# HELP domain_intel_requests_successful_total Queries answered successfully
# TYPE domain_intel_requests_successful_total counter
domain_intel_requests_successful_total {}

# HELP domain_intel_pool_in_flight Jobs currently running on the worker pool
# TYPE domain_intel_pool_in_flight gauge
domain_intel_pool_in_flight {}

# HELP domain_intel_pool_capacity Worker pool capacity (workers plus queue)
# TYPE domain_intel_pool_capacity gauge
domain_intel_pool_capacity {}

# HELP domain_intel_pool_rejected_total Jobs rejected because the pool was saturated
# TYPE domain_intel_pool_rejected_total counter
domain_intel_pool_rejected_total {}
"#,
        stats.uptime_seconds(),
        stats.total_requests(),
        stats.successful_requests(),
        pool.in_flight,
        pool.capacity,
        pool.rejected,
    );

    metrics.push_str("\n# HELP domain_intel_errors_total Errors by type\n");
    metrics.push_str("# TYPE domain_intel_errors_total counter\n");
    for error_type in ErrorType::iter() {
        let _ = writeln!(
            metrics,
            "domain_intel_errors_total{{type=\"{}\"}} {}",
            error_type.metric_label(),
            stats.get_error_count(error_type)
        );
    }

    metrics.push_str("\n# HELP domain_intel_events_total Informational events by type\n");
    metrics.push_str("# TYPE domain_intel_events_total counter\n");
    for info_type in InfoType::iter() {
        let _ = writeln!(
            metrics,
            "domain_intel_events_total{{type=\"{}\"}} {}",
            info_type.metric_label(),
            stats.get_info_count(info_type)
        );
    }

    metrics.push_str("\n# HELP domain_intel_breaker_open Whether a provider's circuit is open (1) or half-open (0.5)\n");
    metrics.push_str("# TYPE domain_intel_breaker_open gauge\n");
    for provider in services.manager.providers() {
        let value = match provider.breaker().state() {
            CircuitState::Closed => "0",
            CircuitState::HalfOpen => "0.5",
            CircuitState::Open => "1",
        };
        let _ = writeln!(
            metrics,
            "domain_intel_breaker_open{{provider=\"{}\"}} {}",
            provider.kind().name(),
            value
        );
    }

    (StatusCode::OK, metrics).into_response()
}
