//! Service container.
//!
//! Every long-lived component is built once here at startup and shared by
//! reference; there is no process-global state besides the logger and the TLS
//! crypto provider.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use super::token::{OpaqueTokenIssuer, TokenIssuer};
use crate::cache::{CacheStore, DedupeLock};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{
    Config, DNS_TIMEOUT_SECS, RATE_LIMIT_SCOPE_REQUESTS, RATE_LIMIT_SCOPE_TOKENS, TOKEN_TTL,
};
use crate::dns::DnsLookup;
use crate::error_handling::ProcessingStats;
use crate::initialization::{init_client, init_resolver, init_store};
use crate::manager::ProviderManager;
use crate::providers::{
    DnsProbeProvider, ProviderKind, RdapProvider, SharedProvider, VendorApiProvider, WhoisProvider,
};
use crate::rate_limit::{FailPolicy, RateLimitRule, RateLimiter};
use crate::store::SharedStore;
use crate::worker_pool::WorkerPool;

pub struct Services {
    pub config: Config,
    pub store: SharedStore,
    pub cache: CacheStore,
    pub locks: DedupeLock,
    pub request_limiter: RateLimiter,
    pub token_limiter: RateLimiter,
    pub pool: WorkerPool,
    pub manager: ProviderManager,
    pub dns: Arc<DnsLookup>,
    pub stats: Arc<ProcessingStats>,
    pub token_issuer: Arc<dyn TokenIssuer>,
}

impl Services {
    /// Connects the store and builds the real upstream providers.
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let store = init_store(&config)
            .await
            .context("Failed to initialize the shared store")?;
        let client = init_client(config.provider_timeout()).context("Failed to build HTTP client")?;
        let dns = Arc::new(DnsLookup::new(init_resolver(Duration::from_secs(DNS_TIMEOUT_SECS))));

        let breaker = |kind: ProviderKind| {
            CircuitBreaker::new(
                kind.name(),
                config.breaker_failure_threshold,
                config.breaker_open_duration(),
            )
        };

        let mut providers: Vec<SharedProvider> = vec![
            Arc::new(RdapProvider::new(
                client.clone(),
                config.rdap_base_url.clone(),
                breaker(ProviderKind::Rdap),
            )),
            Arc::new(WhoisProvider::new(
                config.iana_whois_server.clone(),
                config.provider_timeout(),
                breaker(ProviderKind::LegacyWhois),
            )),
        ];
        if let (Some(url), Some(key)) = (&config.vendor_api_url, &config.vendor_api_key) {
            providers.push(Arc::new(VendorApiProvider::new(
                client.clone(),
                url.clone(),
                key.clone(),
                breaker(ProviderKind::VendorApi),
            )));
        } else {
            log::info!("Vendor WHOIS API disabled (no API key configured)");
        }
        if config.enable_dns_probe {
            providers.push(Arc::new(DnsProbeProvider::new(
                dns.clone(),
                breaker(ProviderKind::DnsProbe),
            )));
        }

        Ok(Self::from_parts(config, store, providers, dns))
    }

    /// Assembles the container from already-built collaborators.
    pub fn from_parts(
        config: Config,
        store: SharedStore,
        providers: Vec<SharedProvider>,
        dns: Arc<DnsLookup>,
    ) -> Self {
        let stats = Arc::new(ProcessingStats::new());
        let cache = CacheStore::new(store.clone(), config.cache_namespace.clone());
        let locks = DedupeLock::new(cache.clone(), config.lock_ttl());
        let request_limiter = RateLimiter::new(
            store.clone(),
            RateLimitRule {
                scope: RATE_LIMIT_SCOPE_REQUESTS.to_string(),
                rate: config.rate_limit,
                burst: config.rate_limit_burst,
                window: Duration::from_secs(config.rate_limit_window_secs),
                fail_policy: FailPolicy::Open,
            },
        );
        let token_limiter = RateLimiter::new(
            store.clone(),
            RateLimitRule {
                scope: RATE_LIMIT_SCOPE_TOKENS.to_string(),
                rate: config.token_rate_limit,
                burst: config.token_rate_limit_burst,
                window: Duration::from_secs(config.token_rate_limit_window_secs),
                fail_policy: FailPolicy::Closed,
            },
        );
        let pool = WorkerPool::new(config.worker_count, config.queue_capacity);
        let manager = ProviderManager::new(providers, cache.clone(), stats.clone())
            .with_call_limit(config.provider_timeout());

        log::info!(
            "Services ready: store={}, workers={}, queue={}",
            store.backend(),
            config.worker_count,
            config.queue_capacity
        );

        Self {
            config,
            store,
            cache,
            locks,
            request_limiter,
            token_limiter,
            pool,
            manager,
            dns,
            stats,
            token_issuer: Arc::new(OpaqueTokenIssuer::new(TOKEN_TTL)),
        }
    }

    /// Replaces the token issuer, e.g. with a JWT-backed one.
    pub fn with_token_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.token_issuer = issuer;
        self
    }

    /// Stops the worker pool and waits for running jobs.
    pub async fn shutdown(&self) {
        log::info!("Shutting down services");
        self.pool.shutdown().await;
    }
}
