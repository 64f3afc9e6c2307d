//! HTTP server data structures.

use serde::Serialize;

use crate::orchestrator::RequestOrchestrator;
use crate::worker_pool::PoolSnapshot;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: RequestOrchestrator,
}

/// Error body returned for every failed request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub status_code: u16,
}

/// JSON response for `/status`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub uptime_seconds: u64,
    pub store_backend: &'static str,
    pub queries: QueryCounts,
    pub cache: CacheCounts,
    pub errors: Vec<LabelledCount>,
    pub pool: PoolSnapshot,
    pub breakers: Vec<BreakerStatus>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCounts {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCounts {
    pub hits: usize,
    pub misses: usize,
    pub hit_ratio: f64,
}

#[derive(Serialize)]
pub struct LabelledCount {
    pub label: &'static str,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub provider: String,
    pub state: &'static str,
    pub consecutive_failures: u32,
}
