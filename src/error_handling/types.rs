//! Error type definitions.
//!
//! This module defines the error taxonomy of the query engine plus the error and
//! info types tracked by [`ProcessingStats`](super::ProcessingStats).

use std::time::Duration;

use log::SetLoggerError;
use reqwest::Error as ReqwestError;
use strum_macros::EnumIter as EnumIterMacro;
use thiserror::Error;

use crate::config::{HTTP_STATUS_CLIENT_CLOSED, HTTP_STATUS_NOT_FOUND, HTTP_STATUS_TOO_MANY_REQUESTS};
use crate::dns::DnsError;
use crate::providers::ProviderKind;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] ReqwestError),

    /// Error connecting to the shared store.
    #[error("Store initialization error: {0}")]
    StoreError(String),

    /// The configuration failed validation.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Failures of the shared key-value store.
///
/// Callers degrade on these according to their own policy (fail-open or
/// fail-closed); a store error never crashes a request.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store rejected the command or the connection is broken.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the client-side timeout.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A cached value could not be encoded or decoded.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// A failure of one provider's upstream call.
///
/// These are absorbed by the provider manager and only surface as part of an
/// aggregate failure when every provider fails.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Network, protocol or parse failure from a specific upstream.
    #[error("{provider} upstream error: {message}")]
    Upstream {
        provider: ProviderKind,
        message: String,
    },

    /// The provider's circuit breaker short-circuited the call.
    #[error("{0} circuit open")]
    CircuitOpen(ProviderKind),

    /// The upstream did not answer within its budget.
    #[error("{0} timed out after {1:?}")]
    Timeout(ProviderKind, Duration),

    /// The request was cancelled while the call was in flight.
    #[error("{0} call cancelled")]
    Cancelled(ProviderKind),
}

impl ProviderError {
    pub fn upstream(provider: ProviderKind, message: impl Into<String>) -> Self {
        ProviderError::Upstream {
            provider,
            message: message.into(),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::Upstream { provider, .. } => *provider,
            ProviderError::CircuitOpen(p)
            | ProviderError::Timeout(p, _)
            | ProviderError::Cancelled(p) => *p,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ProviderError::CircuitOpen(_))
    }
}

/// Every provider failed during a best-result query.
#[derive(Debug, Clone, Default)]
pub struct AggregateFailure {
    pub failures: Vec<ProviderError>,
}

impl AggregateFailure {
    /// True when every attempted provider was short-circuited by its breaker.
    pub fn all_circuits_open(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(ProviderError::is_circuit_open)
    }
}

impl std::fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no providers configured");
        }
        let parts: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("; "))
    }
}

/// Request-level error surfaced to the HTTP layer.
///
/// Each variant carries a distinct [`error_code`](QueryError::error_code) and
/// [`status_code`](QueryError::status_code) so every exit path produces exactly
/// one well-typed response.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    #[error("rate limit exceeded for {scope}")]
    RateLimited { scope: String },

    #[error("service busy: worker pool saturated")]
    PoolSaturated,

    #[error("{op} for {domain} is already being processed, retry later")]
    InProgress { op: String, domain: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("all providers failed: {0}")]
    AllProvidersFailed(AggregateFailure),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error(transparent)]
    Dns(#[from] DnsError),
}

impl QueryError {
    /// Stable machine-readable code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            QueryError::InvalidDomain(_) => "invalid_domain",
            QueryError::RateLimited { .. } => "rate_limited",
            QueryError::PoolSaturated => "service_busy",
            QueryError::InProgress { .. } => "processing",
            QueryError::Store(_) => "store_unavailable",
            QueryError::Timeout(_) => "timeout",
            QueryError::Cancelled => "cancelled",
            QueryError::AllProvidersFailed(agg) if agg.all_circuits_open() => "circuit_open",
            QueryError::AllProvidersFailed(_) => "upstream_failure",
            QueryError::JobFailed(_) => "internal_error",
            QueryError::Dns(DnsError::NxDomain(_)) => "nxdomain",
            QueryError::Dns(_) => "dns_lookup_failed",
        }
    }

    /// HTTP status the handler layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::InvalidDomain(_) => 400,
            QueryError::RateLimited { .. } | QueryError::PoolSaturated => {
                HTTP_STATUS_TOO_MANY_REQUESTS
            }
            QueryError::InProgress { .. } => 409,
            QueryError::Store(_) => 503,
            QueryError::Timeout(_) => 504,
            QueryError::Cancelled => HTTP_STATUS_CLIENT_CLOSED,
            QueryError::AllProvidersFailed(_) => 502,
            QueryError::JobFailed(_) => 500,
            QueryError::Dns(DnsError::NxDomain(_)) => HTTP_STATUS_NOT_FOUND,
            QueryError::Dns(_) => 502,
        }
    }

    /// The stats bucket this error is counted under.
    pub fn error_type(&self) -> ErrorType {
        match self {
            QueryError::InvalidDomain(_) => ErrorType::InvalidDomain,
            QueryError::RateLimited { .. } => ErrorType::RateLimited,
            QueryError::PoolSaturated => ErrorType::PoolSaturated,
            QueryError::InProgress { .. } => ErrorType::DedupeBusy,
            QueryError::Store(_) => ErrorType::StoreUnavailable,
            QueryError::Timeout(_) => ErrorType::QueryTimeout,
            QueryError::Cancelled => ErrorType::QueryCancelled,
            QueryError::AllProvidersFailed(_) => ErrorType::AllProvidersFailed,
            QueryError::JobFailed(_) => ErrorType::JobPanicked,
            QueryError::Dns(_) => ErrorType::DnsLookupError,
        }
    }
}

/// Types of errors counted while serving queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorType {
    // Request-level outcomes
    InvalidDomain,
    RateLimited,
    TokenRateLimited,
    PoolSaturated,
    DedupeBusy,
    StoreUnavailable,
    QueryTimeout,
    QueryCancelled,
    AllProvidersFailed,
    JobPanicked,
    // Provider-level outcomes (absorbed by fallback)
    ProviderUpstreamError,
    ProviderCircuitOpen,
    ProviderTimeout,
    // DNS
    DnsLookupError,
}

/// Informational events that aren't errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum InfoType {
    CacheHit,
    CacheMiss,
    FallbackUsed,    // a lower-priority provider answered
    StoreFailOpen,   // limiter allowed a request because the store was down
    AbandonedJob,    // caller gave up, job kept running to fill the cache
    ComparisonQuery,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidDomain => "Invalid domain",
            ErrorType::RateLimited => "Rate limited",
            ErrorType::TokenRateLimited => "Token issuance rate limited",
            ErrorType::PoolSaturated => "Worker pool saturated",
            ErrorType::DedupeBusy => "Already processing",
            ErrorType::StoreUnavailable => "Store unavailable",
            ErrorType::QueryTimeout => "Query timeout",
            ErrorType::QueryCancelled => "Query cancelled",
            ErrorType::AllProvidersFailed => "All providers failed",
            ErrorType::JobPanicked => "Job panicked",
            ErrorType::ProviderUpstreamError => "Provider upstream error",
            ErrorType::ProviderCircuitOpen => "Provider circuit open",
            ErrorType::ProviderTimeout => "Provider timeout",
            ErrorType::DnsLookupError => "DNS lookup error",
        }
    }

    /// Snake-case label used in Prometheus output.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ErrorType::InvalidDomain => "invalid_domain",
            ErrorType::RateLimited => "rate_limited",
            ErrorType::TokenRateLimited => "token_rate_limited",
            ErrorType::PoolSaturated => "pool_saturated",
            ErrorType::DedupeBusy => "dedupe_busy",
            ErrorType::StoreUnavailable => "store_unavailable",
            ErrorType::QueryTimeout => "query_timeout",
            ErrorType::QueryCancelled => "query_cancelled",
            ErrorType::AllProvidersFailed => "all_providers_failed",
            ErrorType::JobPanicked => "job_panicked",
            ErrorType::ProviderUpstreamError => "provider_upstream_error",
            ErrorType::ProviderCircuitOpen => "provider_circuit_open",
            ErrorType::ProviderTimeout => "provider_timeout",
            ErrorType::DnsLookupError => "dns_lookup_error",
        }
    }
}

impl InfoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoType::CacheHit => "Cache hit",
            InfoType::CacheMiss => "Cache miss",
            InfoType::FallbackUsed => "Fallback provider used",
            InfoType::StoreFailOpen => "Store down, request allowed",
            InfoType::AbandonedJob => "Abandoned job",
            InfoType::ComparisonQuery => "Comparison query",
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            InfoType::CacheHit => "cache_hit",
            InfoType::CacheMiss => "cache_miss",
            InfoType::FallbackUsed => "fallback_used",
            InfoType::StoreFailOpen => "store_fail_open",
            InfoType::AbandonedJob => "abandoned_job",
            InfoType::ComparisonQuery => "comparison_query",
        }
    }
}

impl From<&ProviderError> for ErrorType {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Upstream { .. } | ProviderError::Cancelled(_) => {
                ErrorType::ProviderUpstreamError
            }
            ProviderError::CircuitOpen(_) => ErrorType::ProviderCircuitOpen,
            ProviderError::Timeout(..) => ErrorType::ProviderTimeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_error_type_as_str_is_unique() {
        let mut seen = std::collections::HashSet::new();
        for error_type in ErrorType::iter() {
            assert!(seen.insert(error_type.as_str()), "duplicate label {error_type}");
            assert!(!error_type.metric_label().contains(' '));
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(QueryError::InvalidDomain("x".into()).status_code(), 400);
        assert_eq!(
            QueryError::RateLimited {
                scope: "req".into()
            }
            .status_code(),
            429
        );
        assert_eq!(QueryError::PoolSaturated.status_code(), 429);
        assert_eq!(
            QueryError::Store(StoreError::Timeout(Duration::from_millis(500))).status_code(),
            503
        );
        assert_eq!(QueryError::Timeout(Duration::from_secs(15)).status_code(), 504);
        assert_eq!(
            QueryError::AllProvidersFailed(AggregateFailure::default()).status_code(),
            502
        );
        assert_eq!(QueryError::JobFailed("boom".into()).status_code(), 500);
        assert_eq!(
            QueryError::Dns(DnsError::NxDomain("free-name.com".into())).status_code(),
            404
        );
    }

    #[test]
    fn test_all_circuits_open_gets_distinct_code() {
        let agg = AggregateFailure {
            failures: vec![
                ProviderError::CircuitOpen(ProviderKind::Rdap),
                ProviderError::CircuitOpen(ProviderKind::LegacyWhois),
            ],
        };
        assert!(agg.all_circuits_open());
        assert_eq!(
            QueryError::AllProvidersFailed(agg).error_code(),
            "circuit_open"
        );

        let mixed = AggregateFailure {
            failures: vec![
                ProviderError::CircuitOpen(ProviderKind::Rdap),
                ProviderError::upstream(ProviderKind::LegacyWhois, "connection refused"),
            ],
        };
        assert!(!mixed.all_circuits_open());
        let rendered = mixed.to_string();
        assert!(rendered.contains("RDAP circuit open"), "got: {rendered}");
        assert!(rendered.contains("connection refused"), "got: {rendered}");
    }

    #[test]
    fn test_provider_error_maps_to_stats_bucket() {
        let timeout = ProviderError::Timeout(ProviderKind::VendorApi, Duration::from_secs(1));
        assert_eq!(ErrorType::from(&timeout), ErrorType::ProviderTimeout);
        assert_eq!(timeout.provider(), ProviderKind::VendorApi);
    }
}
