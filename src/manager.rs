//! Provider manager: best-result fallback and comparison fan-out.
//!
//! Providers are kept sorted by [`ProviderKind::priority`]. A best-result query
//! walks them in that order and returns the first success; upstream failures
//! are counted and absorbed and only surface as [`QueryError::AllProvidersFailed`]
//! when every provider failed. Each provider gets a slice of what is left of
//! the caller's budget, so a hanging upstream cannot starve the fallbacks.
//! A comparison query runs all providers at once under one shared deadline
//! and ranks the ones that answered.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::CacheStore;
use crate::config::{MIN_PROVIDER_SLICE, PROVIDER_CALL_TIMEOUT};
use crate::context::RequestContext;
use crate::error_handling::{
    AggregateFailure, ErrorType, InfoType, ProcessingStats, ProviderError, QueryError,
};
use crate::providers::{DomainRecord, ProviderKind, SharedProvider};

/// Result of a best-result query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub record: DomainRecord,
    pub from_cache: bool,
}

/// One provider's entry in a comparison.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderComparison {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DomainRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u64,
    /// Did not finish before the comparison deadline; left out of the ranking.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub total_providers: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub fastest_provider: Option<ProviderKind>,
    pub fastest_time_ms: Option<u64>,
    pub slowest_provider: Option<ProviderKind>,
    pub slowest_time_ms: Option<u64>,
    pub recommended_method: Option<ProviderKind>,
    pub method_description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub domain: String,
    pub results: BTreeMap<ProviderKind, ProviderComparison>,
    pub summary: ComparisonSummary,
}

impl ComparisonSummary {
    /// Ranks the successful, in-time results.
    ///
    /// The recommendation is the highest-priority provider that succeeded,
    /// whatever its latency; speed only decides fastest/slowest.
    pub fn from_results(results: &BTreeMap<ProviderKind, ProviderComparison>) -> Self {
        let successes: Vec<(ProviderKind, u64)> = results
            .iter()
            .filter(|(_, r)| r.success && !r.timed_out)
            .map(|(kind, r)| (*kind, r.response_time_ms))
            .collect();

        let fastest = successes.iter().min_by_key(|(_, ms)| *ms).copied();
        let slowest = successes.iter().max_by_key(|(_, ms)| *ms).copied();
        // BTreeMap iterates in priority order
        let recommended = successes.first().map(|(kind, _)| *kind);

        ComparisonSummary {
            total_providers: results.len(),
            successful_queries: successes.len(),
            failed_queries: results.len() - successes.len(),
            fastest_provider: fastest.map(|(kind, _)| kind),
            fastest_time_ms: fastest.map(|(_, ms)| ms),
            slowest_provider: slowest.map(|(kind, _)| kind),
            slowest_time_ms: slowest.map(|(_, ms)| ms),
            recommended_method: recommended,
            method_description: recommended.map(|kind| kind.description().to_string()),
        }
    }
}

pub struct ProviderManager {
    providers: Vec<SharedProvider>,
    cache: CacheStore,
    stats: Arc<ProcessingStats>,
    call_limit: Duration,
}

impl ProviderManager {
    /// Builds a manager over `providers`, one per kind, in priority order.
    pub fn new(mut providers: Vec<SharedProvider>, cache: CacheStore, stats: Arc<ProcessingStats>) -> Self {
        providers.sort_by_key(|p| p.kind().priority());
        providers.dedup_by_key(|p| p.kind());
        log::info!(
            "Provider fallback order: {}",
            providers
                .iter()
                .map(|p| p.kind().name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        Self {
            providers,
            cache,
            stats,
            call_limit: PROVIDER_CALL_TIMEOUT,
        }
    }

    /// Sets the ceiling on any single provider call.
    pub fn with_call_limit(mut self, limit: Duration) -> Self {
        self.call_limit = limit;
        self
    }

    /// Time allowed to the provider at `position` when the answer is due at
    /// `answer_by`.
    ///
    /// The budget left is split evenly over the providers not yet tried. The
    /// last provider has nothing to fall back to and keeps the full ceiling, as
    /// does every provider once nobody is waiting for the answer.
    fn call_limit_for(&self, position: usize, answer_by: Instant) -> Duration {
        let untried = self.providers.len() - position;
        let left = answer_by.saturating_duration_since(Instant::now());
        if untried <= 1 || left.is_zero() {
            return self.call_limit;
        }
        (left / untried as u32).max(MIN_PROVIDER_SLICE).min(self.call_limit)
    }

    pub fn providers(&self) -> &[SharedProvider] {
        &self.providers
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Cache check, counted as a hit or miss.
    pub async fn cached(&self, domain: &str) -> Option<DomainRecord> {
        let hit = self.cache.get::<DomainRecord>(domain).await;
        self.stats.increment_info(if hit.is_some() {
            InfoType::CacheHit
        } else {
            InfoType::CacheMiss
        });
        hit
    }

    /// Cache-first best-result query.
    pub async fn query_best(&self, ctx: &RequestContext, domain: &str) -> Result<QueryOutcome, QueryError> {
        if let Some(record) = self.cached(domain).await {
            return Ok(QueryOutcome {
                record,
                from_cache: true,
            });
        }
        let record = self.fetch_best(ctx, domain, ctx.deadline()).await?;
        Ok(QueryOutcome {
            record,
            from_cache: false,
        })
    }

    /// Ordered fallback over the upstreams, skipping the cache read.
    ///
    /// The first success is written to the cache before it is returned. A
    /// failed cache write is logged and does not fail the query. `answer_by` is
    /// when the caller stops waiting; `ctx` may outlive it to fill the cache.
    pub async fn fetch_best(
        &self,
        ctx: &RequestContext,
        domain: &str,
        answer_by: Instant,
    ) -> Result<DomainRecord, QueryError> {
        let mut failures = Vec::with_capacity(self.providers.len());

        for (position, provider) in self.providers.iter().enumerate() {
            if ctx.is_done() {
                return Err(context_error(ctx));
            }
            let limit = self.call_limit_for(position, answer_by);
            match provider.query(ctx, domain, limit).await {
                Ok(record) => {
                    if position > 0 {
                        self.stats.increment_info(InfoType::FallbackUsed);
                        log::info!(
                            "[{}] {domain} answered by fallback provider {}",
                            ctx.request_id(),
                            provider.kind()
                        );
                    }
                    if let Err(e) = self.cache.set(domain, &record).await {
                        log::warn!("[{}] Failed to cache result for {domain}: {e}", ctx.request_id());
                    }
                    return Ok(record);
                }
                Err(ProviderError::Cancelled(_)) => return Err(QueryError::Cancelled),
                Err(ProviderError::Timeout(..)) if ctx.is_done() => return Err(context_error(ctx)),
                Err(e) => {
                    log::warn!("[{}] {domain}: {e}", ctx.request_id());
                    self.stats.increment_error(ErrorType::from(&e));
                    failures.push(e);
                }
            }
        }

        Err(QueryError::AllProvidersFailed(AggregateFailure { failures }))
    }

    /// Queries every provider concurrently until `collect_by`.
    ///
    /// Providers still running at `collect_by` are recorded as timed out. Only
    /// cancellation of `ctx` fails the whole comparison.
    pub async fn query_compare(
        &self,
        ctx: &RequestContext,
        domain: &str,
        collect_by: Instant,
    ) -> Result<Comparison, QueryError> {
        self.stats.increment_info(InfoType::ComparisonQuery);
        let deadline = collect_by.min(ctx.deadline());
        let limit = self.call_limit;

        let runs = self.providers.iter().map(|provider| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout_at(deadline, provider.query(ctx, domain, limit)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            (provider.kind(), outcome, elapsed_ms)
        });
        let finished = join_all(runs).await;

        if ctx.cancellation_token().is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        let mut results = BTreeMap::new();
        for (kind, outcome, elapsed_ms) in finished {
            let entry = match outcome {
                Ok(Ok(record)) => ProviderComparison {
                    success: true,
                    data: Some(record),
                    error: None,
                    response_time_ms: elapsed_ms,
                    timed_out: false,
                },
                Ok(Err(e)) => {
                    self.stats.increment_error(ErrorType::from(&e));
                    ProviderComparison {
                        success: false,
                        data: None,
                        timed_out: matches!(e, ProviderError::Timeout(..)),
                        error: Some(e.to_string()),
                        response_time_ms: elapsed_ms,
                    }
                }
                Err(_) => {
                    self.stats.increment_error(ErrorType::ProviderTimeout);
                    ProviderComparison {
                        success: false,
                        data: None,
                        error: Some(format!("{kind} did not answer before the deadline")),
                        response_time_ms: elapsed_ms,
                        timed_out: true,
                    }
                }
            };
            results.insert(kind, entry);
        }

        let summary = ComparisonSummary::from_results(&results);
        log::debug!(
            "[{}] Comparison for {domain}: {}/{} succeeded, recommended {:?}",
            ctx.request_id(),
            summary.successful_queries,
            summary.total_providers,
            summary.recommended_method
        );
        Ok(Comparison {
            domain: domain.to_string(),
            results,
            summary,
        })
    }
}

fn context_error(ctx: &RequestContext) -> QueryError {
    if ctx.cancellation_token().is_cancelled() {
        QueryError::Cancelled
    } else {
        QueryError::Timeout(ctx.budget())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::providers::Provider;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeProvider {
        kind: ProviderKind,
        delay: Duration,
        succeed: bool,
        calls: AtomicUsize,
        breaker: CircuitBreaker,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, delay_ms: u64, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                delay: Duration::from_millis(delay_ms),
                succeed,
                calls: AtomicUsize::new(0),
                breaker: CircuitBreaker::new(kind.name(), 5, Duration::from_secs(30)),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn breaker(&self) -> &CircuitBreaker {
            &self.breaker
        }

        async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.succeed {
                Ok(DomainRecord::registered(domain, self.kind))
            } else {
                Err(ProviderError::upstream(self.kind, "connection reset"))
            }
        }
    }

    fn manager(providers: Vec<SharedProvider>) -> (ProviderManager, Arc<ProcessingStats>) {
        let stats = Arc::new(ProcessingStats::new());
        let cache = CacheStore::new(Arc::new(MemoryStore::new()), "test");
        (ProviderManager::new(providers, cache, stats.clone()), stats)
    }

    #[test]
    fn test_providers_sorted_by_priority() {
        let (manager, _) = manager(vec![
            FakeProvider::new(ProviderKind::DnsProbe, 0, true),
            FakeProvider::new(ProviderKind::Rdap, 0, true),
            FakeProvider::new(ProviderKind::LegacyWhois, 0, true),
        ]);
        let kinds: Vec<ProviderKind> = manager.providers().iter().map(|p| p.kind()).collect();
        assert_eq!(
            kinds,
            vec![ProviderKind::Rdap, ProviderKind::LegacyWhois, ProviderKind::DnsProbe]
        );
    }

    #[tokio::test]
    async fn test_fallback_then_cache_hit() {
        let rdap = FakeProvider::new(ProviderKind::Rdap, 0, false);
        let whois = FakeProvider::new(ProviderKind::LegacyWhois, 0, true);
        let vendor = FakeProvider::new(ProviderKind::VendorApi, 0, true);
        let (manager, stats) = manager(vec![rdap.clone(), whois.clone(), vendor.clone()]);
        let ctx = RequestContext::new("test", Duration::from_secs(5));

        let first = manager.query_best(&ctx, "example.com").await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.record.source_provider, ProviderKind::LegacyWhois);
        assert_eq!(stats.get_info_count(InfoType::FallbackUsed), 1);
        assert_eq!(stats.get_error_count(ErrorType::ProviderUpstreamError), 1);

        let second = manager.query_best(&ctx, "example.com").await.unwrap();
        assert!(second.from_cache);
        assert!(second.record.is_cached);
        assert_eq!(second.record.source_provider, ProviderKind::LegacyWhois);
        assert_eq!(rdap.calls() + whois.calls() + vendor.calls(), 2);
    }

    #[tokio::test]
    async fn test_all_failing_is_aggregate_error() {
        let (manager, _) = manager(vec![
            FakeProvider::new(ProviderKind::Rdap, 0, false),
            FakeProvider::new(ProviderKind::LegacyWhois, 0, false),
        ]);
        let ctx = RequestContext::new("test", Duration::from_secs(5));
        match manager.query_best(&ctx, "example.com").await {
            Err(QueryError::AllProvidersFailed(agg)) => assert_eq!(agg.failures.len(), 2),
            other => panic!("expected aggregate failure, got {other:?}"),
        }
        assert!(manager.cached("example.com").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_fallback_is_timeout() {
        let (manager, _) = manager(vec![FakeProvider::new(ProviderKind::Rdap, 60_000, true)]);
        let ctx = RequestContext::new("test", Duration::from_secs(1));
        let err = manager
            .fetch_best(&ctx, "example.com", ctx.deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_comparison_ranks_by_speed_and_recommends_by_priority() {
        let (manager, _) = manager(vec![
            FakeProvider::new(ProviderKind::Rdap, 300, true),
            FakeProvider::new(ProviderKind::LegacyWhois, 50, false),
            FakeProvider::new(ProviderKind::VendorApi, 100, true),
            FakeProvider::new(ProviderKind::DnsProbe, 20, false),
        ]);
        let ctx = RequestContext::new("test", Duration::from_secs(30));
        let comparison = manager
            .query_compare(&ctx, "example.com", ctx.deadline())
            .await.unwrap();
        let summary = &comparison.summary;

        assert_eq!(summary.total_providers, 4);
        assert_eq!(summary.successful_queries, 2);
        assert_eq!(summary.failed_queries, 2);
        assert_eq!(summary.fastest_provider, Some(ProviderKind::VendorApi));
        assert_eq!(summary.slowest_provider, Some(ProviderKind::Rdap));
        assert_eq!(summary.recommended_method, Some(ProviderKind::Rdap));
        assert!(summary.fastest_time_ms.unwrap() >= 100);
        assert!(summary.slowest_time_ms.unwrap() >= 300);

        let json = serde_json::to_value(&comparison).unwrap();
        assert_eq!(json["summary"]["recommendedMethod"], "RDAP");
        assert_eq!(json["results"]["VendorAPI"]["success"], true);
        assert!(json["results"]["LegacyWhois"]["error"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_provider_is_excluded_from_ranking() {
        let (manager, _) = manager(vec![
            FakeProvider::new(ProviderKind::Rdap, 120_000, true),
            FakeProvider::new(ProviderKind::LegacyWhois, 200, true),
        ]);
        let ctx = RequestContext::new("test", Duration::from_secs(2));
        let comparison = manager
            .query_compare(&ctx, "example.com", ctx.deadline())
            .await.unwrap();

        assert!(comparison.results[&ProviderKind::Rdap].timed_out);
        assert_eq!(comparison.summary.successful_queries, 1);
        assert_eq!(comparison.summary.recommended_method, Some(ProviderKind::LegacyWhois));
        assert_eq!(comparison.summary.slowest_provider, Some(ProviderKind::LegacyWhois));
    }

    #[tokio::test]
    async fn test_cancelled_comparison_is_error() {
        let (manager, _) = manager(vec![FakeProvider::new(ProviderKind::Rdap, 5_000, true)]);
        let ctx = RequestContext::new("test", Duration::from_secs(30));
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = manager
            .query_compare(&ctx, "example.com", ctx.deadline())
            .await.unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_first_provider_leaves_time_for_fallback() {
        let rdap = FakeProvider::new(ProviderKind::Rdap, 600_000, true);
        let whois = FakeProvider::new(ProviderKind::LegacyWhois, 10, true);
        let (manager, stats) = manager(vec![rdap.clone(), whois.clone()]);
        let ctx = RequestContext::new("test", Duration::from_secs(2));
        let started = Instant::now();

        let outcome = manager.query_best(&ctx, "example.com").await.unwrap();
        assert_eq!(outcome.record.source_provider, ProviderKind::LegacyWhois);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(whois.calls(), 1);
        assert_eq!(stats.get_error_count(ErrorType::ProviderTimeout), 1);
        assert_eq!(stats.get_info_count(InfoType::FallbackUsed), 1);
        assert_eq!(rdap.breaker.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_limit_split_over_untried_providers() {
        let (manager, _) = manager(vec![
            FakeProvider::new(ProviderKind::Rdap, 0, true),
            FakeProvider::new(ProviderKind::LegacyWhois, 0, true),
            FakeProvider::new(ProviderKind::VendorApi, 0, true),
        ]);
        let manager = manager.with_call_limit(Duration::from_secs(10));
        let now = Instant::now();

        assert_eq!(manager.call_limit_for(0, now + Duration::from_secs(6)), Duration::from_secs(2));
        assert_eq!(manager.call_limit_for(1, now + Duration::from_secs(6)), Duration::from_secs(3));
        // The last provider and unattended jobs keep the ceiling
        assert_eq!(manager.call_limit_for(2, now + Duration::from_secs(6)), Duration::from_secs(10));
        assert_eq!(manager.call_limit_for(0, now), Duration::from_secs(10));
        assert_eq!(manager.call_limit_for(0, now + Duration::from_secs(600)), Duration::from_secs(10));
        assert_eq!(manager.call_limit_for(0, now + Duration::from_millis(600)), MIN_PROVIDER_SLICE);
    }
}
