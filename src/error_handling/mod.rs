//! Error handling and query statistics.
//!
//! This module provides:
//! - The error taxonomy (`QueryError`, `ProviderError`, `StoreError`, ...)
//! - HTTP status / error-code mapping for every request-level failure
//! - Processing statistics tracking (errors and informational events)
//!
//! Provider errors are absorbed by fallback and only surface inside an
//! aggregate failure; pool, limiter and store errors surface immediately with a
//! distinct code.

mod stats;
mod types;

// Re-export public API
pub use stats::ProcessingStats;
pub use types::{
    AggregateFailure, ErrorType, InfoType, InitializationError, ProviderError, QueryError,
    StoreError,
};

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_processing_stats_initialization() {
        let stats = ProcessingStats::new();
        for error_type in ErrorType::iter() {
            assert_eq!(stats.get_error_count(error_type), 0);
        }
        for info_type in InfoType::iter() {
            assert_eq!(stats.get_info_count(info_type), 0);
        }
        assert_eq!(stats.total_requests(), 0);
    }

    #[test]
    fn test_processing_stats_increment() {
        let stats = ProcessingStats::new();
        stats.increment_error(ErrorType::PoolSaturated);
        stats.increment_error(ErrorType::PoolSaturated);
        stats.increment_info(InfoType::CacheHit);

        assert_eq!(stats.get_error_count(ErrorType::PoolSaturated), 2);
        assert_eq!(stats.get_info_count(InfoType::CacheHit), 1);
        assert_eq!(stats.total_errors(), 2);
        assert_eq!(stats.total_info(), 1);
    }

    #[test]
    fn test_cache_hit_ratio() {
        let stats = ProcessingStats::new();
        assert_eq!(stats.cache_hit_ratio(), 0.0);

        stats.increment_info(InfoType::CacheHit);
        stats.increment_info(InfoType::CacheHit);
        stats.increment_info(InfoType::CacheHit);
        stats.increment_info(InfoType::CacheMiss);
        assert!((stats.cache_hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_query_error_counts_into_matching_bucket() {
        let stats = ProcessingStats::new();
        let err = QueryError::InProgress {
            op: "whois".to_string(),
            domain: "example.com".to_string(),
        };
        stats.increment_error(err.error_type());
        assert_eq!(stats.get_error_count(ErrorType::DedupeBusy), 1);
        assert_eq!(err.status_code(), 409);
    }
}
