//! Fixed-window rate limiting on the shared store.
//!
//! Each call increments the counter `{scope}:{identity}:{bucket}`, where
//! `bucket = unix_seconds / window_seconds`. The counter's expiry is set when the
//! increment creates it, so a window's key disappears on its own shortly after
//! the window ends. A call is allowed while the count stays within
//! `rate + burst`.
//!
//! Concurrent callers never undercount (the increment is atomic on the store).
//! Bursts straddling a bucket boundary can briefly see up to twice the limit;
//! that is inherent to fixed windows.
//!
//! What happens when the store is unreachable is a property of the rule:
//! [`FailPolicy::Open`] lets traffic through, [`FailPolicy::Closed`] refuses it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::context::RequestContext;
use crate::error_handling::StoreError;
use crate::store::SharedStore;

/// Behaviour when the backing store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPolicy {
    /// Allow the call; a store outage must not turn into rejecting all traffic.
    Open,
    /// Refuse the call; used where unlimited access during an outage is unsafe.
    Closed,
}

#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub scope: String,
    pub rate: u32,
    pub burst: u32,
    pub window: Duration,
    pub fail_policy: FailPolicy,
}

impl RateLimitRule {
    pub fn limit(&self) -> u64 {
        u64::from(self.rate) + u64::from(self.burst)
    }
}

/// Outcome of one limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Count after this call, or `None` if the store could not be reached.
    pub count: Option<u64>,
    pub limit: u64,
    /// Seconds until the current window ends.
    pub reset_after: u64,
    /// Set when the decision was made by the fail policy.
    pub degraded: bool,
}

impl RateLimitDecision {
    pub fn remaining(&self) -> u64 {
        self.count
            .map(|count| self.limit.saturating_sub(count))
            .unwrap_or(self.limit)
    }
}

/// Window bucket for `unix_secs` with a window of `window_secs`.
pub fn window_bucket(unix_secs: u64, window_secs: u64) -> u64 {
    unix_secs / window_secs.max(1)
}

pub struct RateLimiter {
    store: SharedStore,
    rule: RateLimitRule,
}

impl RateLimiter {
    pub fn new(store: SharedStore, rule: RateLimitRule) -> Self {
        Self { store, rule }
    }

    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    pub fn key(&self, identity: &str, bucket: u64) -> String {
        format!("{}:{}:{}", self.rule.scope, identity, bucket)
    }

    /// Whether `identity` may proceed.
    ///
    /// Under [`FailPolicy::Open`] a store failure yields `Ok(true)`; under
    /// [`FailPolicy::Closed`] it is returned as `Err`.
    pub async fn allow(&self, ctx: &RequestContext, identity: &str) -> Result<bool, StoreError> {
        self.check(ctx, identity).await.map(|decision| decision.allowed)
    }

    /// Like [`allow`](Self::allow), with the counter details for response headers.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        identity: &str,
    ) -> Result<RateLimitDecision, StoreError> {
        self.check_at(ctx, identity, unix_now()).await
    }

    async fn check_at(
        &self,
        ctx: &RequestContext,
        identity: &str,
        unix_secs: u64,
    ) -> Result<RateLimitDecision, StoreError> {
        let window_secs = self.rule.window.as_secs().max(1);
        let bucket = window_bucket(unix_secs, window_secs);
        let key = self.key(identity, bucket);
        let reset_after = (bucket + 1) * window_secs - unix_secs;
        let limit = self.rule.limit();

        let counted = tokio::select! {
            result = self.store.incr_with_expiry(&key, Duration::from_secs(window_secs)) => result,
            _ = ctx.done() => Err(StoreError::Unavailable("request ended during rate-limit check".to_string())),
        };

        match counted {
            Ok(count) => {
                let count = count.max(0) as u64;
                let allowed = count <= limit;
                if !allowed {
                    log::debug!(
                        "[{}] {} over limit: {}/{} in bucket {}",
                        ctx.request_id(),
                        key,
                        count,
                        limit,
                        bucket
                    );
                }
                Ok(RateLimitDecision {
                    allowed,
                    count: Some(count),
                    limit,
                    reset_after,
                    degraded: false,
                })
            }
            Err(e) => match self.rule.fail_policy {
                FailPolicy::Open => {
                    log::warn!(
                        "[{}] Rate limiter store error on {}, allowing request: {}",
                        ctx.request_id(),
                        self.rule.scope,
                        e
                    );
                    Ok(RateLimitDecision {
                        allowed: true,
                        count: None,
                        limit,
                        reset_after,
                        degraded: true,
                    })
                }
                FailPolicy::Closed => {
                    log::warn!(
                        "[{}] Rate limiter store error on {}, refusing request: {}",
                        ctx.request_id(),
                        self.rule.scope,
                        e
                    );
                    Err(e)
                }
            },
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
