//! Per-request lifecycle.
//!
//! Every query goes through the same steps:
//!
//! 1. rate limit (fail-open for queries, fail-closed for tokens)
//! 2. sanitize the domain
//! 3. cache check
//! 4. on a miss, claim the `(op, domain)` dedupe lock or answer "in progress"
//! 5. run the fetch on the worker pool and wait for result, cancellation or deadline
//!
//! The dedupe guard moves into the job, so it is released when the fetch ends
//! rather than when the caller stops waiting; a caller that times out leaves
//! the job running (up to the lock TTL) to fill the cache for the next request.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cacheable, DedupeGuard};
use crate::config::COMPARE_COLLECT_MARGIN;
use crate::context::RequestContext;
use crate::dns::DnsRecords;
use crate::domain::sanitize_domain;
use crate::error_handling::{ErrorType, InfoType, QueryError};
use crate::manager::{Comparison, QueryOutcome};

mod services;
mod token;

pub use services::Services;
pub use token::{IssuedToken, OpaqueTokenIssuer, TokenIssuer};

/// Dedupe lock operation names.
pub const OP_WHOIS: &str = "whois";
pub const OP_DNS: &str = "dns";
pub const OP_COMPARE: &str = "compare";

#[derive(Clone)]
pub struct RequestOrchestrator {
    services: Arc<Services>,
}

impl RequestOrchestrator {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Best-result registration lookup.
    pub async fn query_domain(&self, ctx: &RequestContext, raw: &str) -> Result<QueryOutcome, QueryError> {
        let result = self.query_domain_inner(ctx, raw).await;
        self.record(&result);
        result
    }

    async fn query_domain_inner(&self, ctx: &RequestContext, raw: &str) -> Result<QueryOutcome, QueryError> {
        self.admit(ctx).await?;
        let domain = sanitize(raw)?;
        let ctx = ctx.with_timeout(self.services.config.whois_timeout());

        if let Some(record) = self.services.manager.cached(&domain).await {
            return Ok(QueryOutcome {
                record,
                from_cache: true,
            });
        }

        let services = self.services.clone();
        let job_domain = domain.clone();
        let budget = self.services.config.whois_timeout();
        let answer_by = ctx.deadline();
        let (record, from_cache) = self
            .run_deduped(&ctx, OP_WHOIS, &domain, budget, move |job_ctx| async move {
                services.manager.fetch_best(&job_ctx, &job_domain, answer_by).await
            })
            .await?;
        Ok(QueryOutcome { record, from_cache })
    }

    /// Concurrent comparison of every provider.
    pub async fn compare_domain(&self, ctx: &RequestContext, raw: &str) -> Result<Comparison, QueryError> {
        let result = self.compare_domain_inner(ctx, raw).await;
        self.record(&result);
        result
    }

    async fn compare_domain_inner(&self, ctx: &RequestContext, raw: &str) -> Result<Comparison, QueryError> {
        self.admit(ctx).await?;
        let domain = sanitize(raw)?;
        let budget = self.services.config.compare_timeout();
        let ctx = ctx.with_timeout(budget);
        let guard = self.claim(OP_COMPARE, &domain).await?;

        // Stop collecting early enough for the answer to reach the caller
        let margin = COMPARE_COLLECT_MARGIN.min(budget / 10);
        let collect_by = ctx.deadline().checked_sub(margin).unwrap_or_else(|| ctx.deadline());
        let services = self.services.clone();
        let job_ctx = ctx.detached(self.background_budget(budget));
        let handle = self.services.pool.spawn(&ctx, async move {
            let comparison = services.manager.query_compare(&job_ctx, &domain, collect_by).await;
            release(guard).await;
            comparison
        })?;
        self.await_job(&ctx, handle.wait(&ctx)).await
    }

    /// A/AAAA/MX/NS/TXT lookup. Incomplete answers are returned but not cached.
    pub async fn lookup_dns(&self, ctx: &RequestContext, raw: &str) -> Result<DnsRecords, QueryError> {
        let result = self.lookup_dns_inner(ctx, raw).await;
        self.record(&result);
        result
    }

    async fn lookup_dns_inner(&self, ctx: &RequestContext, raw: &str) -> Result<DnsRecords, QueryError> {
        self.admit(ctx).await?;
        let domain = sanitize(raw)?;
        let budget = self.services.config.dns_timeout();
        let ctx = ctx.with_timeout(budget);

        if let Some(records) = self.services.cache.get::<DnsRecords>(&domain).await {
            self.services.stats.increment_info(InfoType::CacheHit);
            return Ok(records);
        }
        self.services.stats.increment_info(InfoType::CacheMiss);

        let services = self.services.clone();
        let job_domain = domain.clone();
        let (records, _) = self
            .run_deduped(&ctx, OP_DNS, &domain, budget, move |job_ctx| async move {
                let records = tokio::select! {
                    records = services.dns.lookup_all(&job_domain) => records?,
                    _ = job_ctx.done() => return Err(QueryError::Timeout(job_ctx.budget())),
                };
                if records.is_complete() {
                    if let Err(e) = services.cache.set(&job_domain, &records).await {
                        log::warn!("Failed to cache DNS records for {job_domain}: {e}");
                    }
                } else {
                    log::debug!("Not caching partial DNS answer for {job_domain}: {:?}", records.errors);
                }
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Issues an API token, at most `token_rate_limit` per identity per window.
    ///
    /// Unlike queries, a store outage refuses issuance.
    pub async fn issue_token(&self, ctx: &RequestContext) -> Result<IssuedToken, QueryError> {
        self.services.stats.record_request();
        let limiter = &self.services.token_limiter;
        match limiter.check(ctx, ctx.identity()).await {
            Ok(decision) if decision.allowed => {
                self.services.stats.record_success();
                Ok(self.services.token_issuer.issue(ctx.identity()))
            }
            Ok(_) => {
                self.services.stats.increment_error(ErrorType::TokenRateLimited);
                Err(QueryError::RateLimited {
                    scope: limiter.rule().scope.clone(),
                })
            }
            Err(e) => {
                log::error!("[{}] Token limiter unavailable, refusing issuance: {e}", ctx.request_id());
                let err = QueryError::Store(e);
                self.services.stats.increment_error(err.error_type());
                Err(err)
            }
        }
    }

    async fn admit(&self, ctx: &RequestContext) -> Result<(), QueryError> {
        self.services.stats.record_request();
        let limiter = &self.services.request_limiter;
        let decision = limiter.check(ctx, ctx.identity()).await?;
        if decision.degraded {
            self.services.stats.increment_info(InfoType::StoreFailOpen);
        }
        if decision.allowed {
            Ok(())
        } else {
            Err(QueryError::RateLimited {
                scope: limiter.rule().scope.clone(),
            })
        }
    }

    /// Claims the dedupe lock for `(op, domain)`.
    ///
    /// A store failure proceeds without the lock: losing dedupe for the length
    /// of an outage is preferable to refusing every query.
    async fn claim(&self, op: &str, domain: &str) -> Result<Option<DedupeGuard>, QueryError> {
        match self.services.locks.acquire(op, domain).await {
            Ok(Some(guard)) => Ok(Some(guard)),
            Ok(None) => Err(QueryError::InProgress {
                op: op.to_string(),
                domain: domain.to_string(),
            }),
            Err(e) => {
                log::warn!("Dedupe lock unavailable for {op}:{domain}, proceeding unlocked: {e}");
                self.services.stats.increment_info(InfoType::StoreFailOpen);
                Ok(None)
            }
        }
    }

    /// Lock, re-check the cache, then fetch on the pool.
    ///
    /// Returns the value and whether it came from the cache.
    async fn run_deduped<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        op: &str,
        domain: &str,
        budget: Duration,
        fetch: F,
    ) -> Result<(T, bool), QueryError>
    where
        T: Cacheable + Send + 'static,
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let guard = self.claim(op, domain).await?;

        // The previous holder may have filled the cache between our miss and the claim
        if let Some(hit) = self.services.cache.get::<T>(domain).await {
            release(guard).await;
            return Ok((hit, true));
        }

        let job_ctx = ctx.detached(self.background_budget(budget));
        let handle = self.services.pool.spawn(ctx, async move {
            let result = fetch(job_ctx).await;
            release(guard).await;
            result
        })?;
        let value = self.await_job(ctx, handle.wait(ctx)).await?;
        Ok((value, false))
    }

    /// How long a job may keep running after its caller stopped waiting.
    ///
    /// Matches the dedupe lock TTL so the lock outlives the fetch it guards.
    fn background_budget(&self, caller_budget: Duration) -> Duration {
        self.services.locks.ttl().max(caller_budget)
    }

    async fn await_job<T>(
        &self,
        ctx: &RequestContext,
        wait: impl Future<Output = Result<T, QueryError>>,
    ) -> Result<T, QueryError> {
        let result = wait.await;
        if let Err(QueryError::Timeout(_)) = &result {
            self.services.stats.increment_info(InfoType::AbandonedJob);
            log::info!(
                "[{}] Caller timed out; job left running to fill the cache",
                ctx.request_id()
            );
        }
        result
    }

    fn record<T>(&self, result: &Result<T, QueryError>) {
        match result {
            Ok(_) => self.services.stats.record_success(),
            Err(e) => {
                self.services.stats.increment_error(e.error_type());
                log::debug!("Query failed ({}): {e}", e.error_code());
            }
        }
    }
}

fn sanitize(raw: &str) -> Result<String, QueryError> {
    sanitize_domain(raw).map_err(|e| QueryError::InvalidDomain(e.to_string()))
}

async fn release(guard: Option<DedupeGuard>) {
    if let Some(guard) = guard {
        guard.release().await;
    }
}

#[cfg(test)]
mod tests;
