use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::dns::DnsLookup;
use crate::error_handling::ProviderError;
use crate::initialization::init_resolver;
use crate::providers::{DomainRecord, Provider, ProviderKind, SharedProvider};
use crate::store::MemoryStore;

struct CountingProvider {
    kind: ProviderKind,
    delay: Duration,
    calls: AtomicUsize,
    breaker: CircuitBreaker,
}

impl CountingProvider {
    fn new(kind: ProviderKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            delay,
            calls: AtomicUsize::new(0),
            breaker: CircuitBreaker::new(kind.name(), 5, Duration::from_secs(30)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for CountingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(DomainRecord::registered(domain, self.kind))
    }
}

fn test_config() -> Config {
    Config {
        worker_count: 4,
        queue_capacity: 4,
        rate_limit: 100,
        rate_limit_burst: 0,
        rate_limit_window_secs: 3600,
        token_rate_limit: 1,
        token_rate_limit_burst: 0,
        token_rate_limit_window_secs: 3600,
        ..Default::default()
    }
}

fn orchestrator_with(
    config: Config,
    store: Arc<MemoryStore>,
    providers: Vec<SharedProvider>,
) -> RequestOrchestrator {
    let dns = Arc::new(DnsLookup::new(init_resolver(Duration::from_secs(1))));
    let services = Services::from_parts(config, store, providers, dns);
    RequestOrchestrator::new(Arc::new(services))
}

fn ctx(identity: &str) -> RequestContext {
    RequestContext::new(identity, Duration::from_secs(30))
}

#[tokio::test]
async fn test_invalid_domain_is_rejected_before_any_work() {
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::ZERO);
    let orchestrator = orchestrator_with(test_config(), Arc::new(MemoryStore::new()), vec![provider.clone()]);

    let err = orchestrator.query_domain(&ctx("10.0.0.1"), "192.168.1.1").await.unwrap_err();
    assert!(matches!(err, QueryError::InvalidDomain(_)));
    assert_eq!(err.status_code(), 400);
    assert_eq!(provider.calls(), 0);
    assert_eq!(orchestrator.services().stats.get_error_count(ErrorType::InvalidDomain), 1);
}

#[tokio::test]
async fn test_miss_then_hit() {
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::ZERO);
    let orchestrator = orchestrator_with(test_config(), Arc::new(MemoryStore::new()), vec![provider.clone()]);

    let first = orchestrator
        .query_domain(&ctx("10.0.0.1"), "https://WWW.Example.com/path")
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.record.domain, "example.com");

    let second = orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await.unwrap();
    assert!(second.from_cache);
    assert!(second.record.is_cached);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_request_limit_rejects_over_rate() {
    let config = Config {
        rate_limit: 2,
        ..test_config()
    };
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::ZERO);
    let orchestrator = orchestrator_with(config, Arc::new(MemoryStore::new()), vec![provider]);

    for _ in 0..2 {
        orchestrator.query_domain(&ctx("10.0.0.9"), "example.com").await.unwrap();
    }
    let err = orchestrator.query_domain(&ctx("10.0.0.9"), "example.com").await.unwrap_err();
    assert!(matches!(err, QueryError::RateLimited { .. }));
    assert_eq!(err.status_code(), 429);

    // Another identity has its own counter
    assert!(orchestrator.query_domain(&ctx("10.0.0.10"), "example.com").await.is_ok());
}

#[tokio::test]
async fn test_store_outage_fails_open_for_queries_and_closed_for_tokens() {
    let store = Arc::new(MemoryStore::new());
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::ZERO);
    let orchestrator = orchestrator_with(test_config(), store.clone(), vec![provider.clone()]);
    store.set_unavailable(true);

    let outcome = orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await.unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(provider.calls(), 1);
    assert!(orchestrator.services().stats.get_info_count(InfoType::StoreFailOpen) >= 1);

    let err = orchestrator.issue_token(&ctx("10.0.0.1")).await.unwrap_err();
    assert!(matches!(err, QueryError::Store(_)));
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_token_issuance_is_limited_per_identity() {
    let orchestrator = orchestrator_with(test_config(), Arc::new(MemoryStore::new()), vec![]);

    let token = orchestrator.issue_token(&ctx("10.0.0.1")).await.unwrap();
    assert_eq!(token.token_type, "Bearer");

    let err = orchestrator.issue_token(&ctx("10.0.0.1")).await.unwrap_err();
    assert!(matches!(err, QueryError::RateLimited { .. }));
    assert_eq!(
        orchestrator.services().stats.get_error_count(ErrorType::TokenRateLimited),
        1
    );
}

#[tokio::test]
async fn test_concurrent_queries_fetch_once() {
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::from_millis(200));
    let orchestrator = orchestrator_with(test_config(), Arc::new(MemoryStore::new()), vec![provider.clone()]);

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = orchestrator.query_domain(&ctx("10.0.0.2"), "example.com").await;

    let first = first.await.unwrap().unwrap();
    assert!(!first.from_cache);
    match second {
        Err(QueryError::InProgress { op, domain }) => {
            assert_eq!(op, OP_WHOIS);
            assert_eq!(domain, "example.com");
        }
        Ok(outcome) => assert!(outcome.from_cache),
        Err(other) => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_saturated_pool_is_service_busy() {
    let config = Config {
        worker_count: 1,
        queue_capacity: 0,
        ..test_config()
    };
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::from_millis(300));
    let orchestrator = orchestrator_with(config, Arc::new(MemoryStore::new()), vec![provider]);

    let busy = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = orchestrator.query_domain(&ctx("10.0.0.1"), "example.org").await.unwrap_err();
    assert!(matches!(err, QueryError::PoolSaturated));
    assert_eq!(err.error_code(), "service_busy");
    assert!(busy.await.unwrap().is_ok());

    // The rejected job's lock was released with it
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(orchestrator.query_domain(&ctx("10.0.0.1"), "example.org").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_caller_leaves_job_to_fill_cache() {
    let config = Config {
        whois_timeout_secs: 1,
        lock_ttl_secs: 30,
        ..test_config()
    };
    let provider = CountingProvider::new(ProviderKind::Rdap, Duration::from_secs(3));
    let orchestrator = orchestrator_with(config, Arc::new(MemoryStore::new()), vec![provider.clone()]);

    let err = orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await.unwrap_err();
    assert!(matches!(err, QueryError::Timeout(_)));
    assert_eq!(err.status_code(), 504);
    assert_eq!(orchestrator.services().stats.get_info_count(InfoType::AbandonedJob), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let later = orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await.unwrap();
    assert!(later.from_cache);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_compare_runs_every_provider() {
    let rdap = CountingProvider::new(ProviderKind::Rdap, Duration::from_millis(30));
    let whois = CountingProvider::new(ProviderKind::LegacyWhois, Duration::from_millis(10));
    let orchestrator = orchestrator_with(
        test_config(),
        Arc::new(MemoryStore::new()),
        vec![rdap.clone(), whois.clone()],
    );

    let comparison = orchestrator.compare_domain(&ctx("10.0.0.1"), "example.com").await.unwrap();
    assert_eq!(comparison.summary.total_providers, 2);
    assert_eq!(comparison.summary.recommended_method, Some(ProviderKind::Rdap));
    assert_eq!(comparison.summary.fastest_provider, Some(ProviderKind::LegacyWhois));
    assert_eq!(rdap.calls() + whois.calls(), 2);
    assert_eq!(
        orchestrator.services().stats.get_info_count(InfoType::ComparisonQuery),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_hanging_rdap_falls_back_within_query_budget() {
    let config = Config {
        whois_timeout_secs: 2,
        ..test_config()
    };
    let rdap = CountingProvider::new(ProviderKind::Rdap, Duration::from_secs(600));
    let whois = CountingProvider::new(ProviderKind::LegacyWhois, Duration::from_millis(10));
    let orchestrator = orchestrator_with(
        config,
        Arc::new(MemoryStore::new()),
        vec![rdap.clone(), whois.clone()],
    );

    let outcome = orchestrator.query_domain(&ctx("10.0.0.1"), "example.com").await.unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(outcome.record.source_provider, ProviderKind::LegacyWhois);
    assert_eq!(rdap.calls(), 1);
    assert_eq!(whois.calls(), 1);

    let stats = &orchestrator.services().stats;
    assert_eq!(stats.get_info_count(InfoType::FallbackUsed), 1);
    assert_eq!(stats.get_error_count(ErrorType::ProviderTimeout), 1);
    assert_eq!(stats.get_info_count(InfoType::AbandonedJob), 0);
}

#[tokio::test(start_paused = true)]
async fn test_compare_marks_hanging_provider_timed_out() {
    let config = Config {
        compare_timeout_secs: 2,
        ..test_config()
    };
    let rdap = CountingProvider::new(ProviderKind::Rdap, Duration::from_secs(600));
    let whois = CountingProvider::new(ProviderKind::LegacyWhois, Duration::from_millis(100));
    let orchestrator = orchestrator_with(config, Arc::new(MemoryStore::new()), vec![rdap, whois]);

    let comparison = orchestrator
        .compare_domain(&ctx("10.0.0.1"), "example.com")
        .await
        .unwrap();
    assert!(comparison.results[&ProviderKind::Rdap].timed_out);
    assert!(!comparison.results[&ProviderKind::Rdap].success);
    assert!(comparison.results[&ProviderKind::LegacyWhois].success);
    assert_eq!(comparison.summary.successful_queries, 1);
    assert_eq!(
        comparison.summary.recommended_method,
        Some(ProviderKind::LegacyWhois)
    );
    assert_eq!(
        orchestrator.services().stats.get_info_count(InfoType::AbandonedJob),
        0
    );
}
