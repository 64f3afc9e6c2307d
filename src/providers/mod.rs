//! Registration-data providers.
//!
//! A provider is one upstream strategy for answering "who holds this domain":
//!
//! - [`RdapProvider`] - RDAP over HTTPS
//! - [`WhoisProvider`] - the classic text protocol on TCP port 43
//! - [`VendorApiProvider`] - a commercial WHOIS JSON API
//! - [`DnsProbeProvider`] - infers registration from delegation (NS records)
//!
//! The set of kinds is closed ([`ProviderKind`]) and its declaration order is the
//! fallback priority. Every provider owns a [`CircuitBreaker`]; callers go
//! through [`Provider::query`], which runs the upstream call inside it and stops
//! as soon as the request context is done.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::EnumIter as EnumIterMacro;

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::context::{ContextDone, RequestContext};
use crate::error_handling::ProviderError;

mod dns_probe;
pub mod parse;
mod rdap;
mod types;
mod vendor;
mod whois;

pub use dns_probe::DnsProbeProvider;
pub use rdap::RdapProvider;
pub use types::DomainRecord;
pub use vendor::VendorApiProvider;
pub use whois::WhoisProvider;

/// The closed set of provider kinds, in fallback priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumIterMacro,
)]
pub enum ProviderKind {
    #[serde(rename = "RDAP")]
    Rdap,
    #[serde(rename = "LegacyWhois")]
    LegacyWhois,
    #[serde(rename = "VendorAPI")]
    VendorApi,
    #[serde(rename = "DnsProbe")]
    DnsProbe,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Rdap => "RDAP",
            ProviderKind::LegacyWhois => "LegacyWhois",
            ProviderKind::VendorApi => "VendorAPI",
            ProviderKind::DnsProbe => "DnsProbe",
        }
    }

    /// Human-readable method description used in comparison summaries.
    pub fn description(&self) -> &'static str {
        match self {
            ProviderKind::Rdap => "Registration Data Access Protocol (structured JSON over HTTPS)",
            ProviderKind::LegacyWhois => "Traditional WHOIS protocol (plain text over TCP port 43)",
            ProviderKind::VendorApi => "Commercial WHOIS API (aggregated JSON)",
            ProviderKind::DnsProbe => "DNS delegation probe (registration inferred from NS records)",
        }
    }

    /// Lower is tried first.
    pub fn priority(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn breaker(&self) -> &CircuitBreaker;

    /// The raw upstream call, without breaker or context handling.
    async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError>;

    /// Queries the upstream through this provider's breaker.
    ///
    /// `limit` bounds this provider's whole upstream exchange; running out of it
    /// counts as a breaker failure. If the context finishes first the call is
    /// dropped and an abandoned call is not counted against the breaker.
    async fn query(
        &self,
        ctx: &RequestContext,
        domain: &str,
        limit: Duration,
    ) -> Result<DomainRecord, ProviderError> {
        let kind = self.kind();
        let bounded = || async move {
            match tokio::time::timeout(limit, self.fetch(domain)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Timeout(kind, limit)),
            }
        };
        tokio::select! {
            outcome = self.breaker().call(bounded) => match outcome {
                Ok(record) => Ok(record),
                Err(BreakerError::Open) => Err(ProviderError::CircuitOpen(kind)),
                Err(BreakerError::Inner(e)) => Err(e),
            },
            done = ctx.done() => match done {
                ContextDone::Cancelled => Err(ProviderError::Cancelled(kind)),
                ContextDone::DeadlineExceeded => Err(ProviderError::Timeout(kind, ctx.budget())),
            },
        }
    }
}

pub type SharedProvider = Arc<dyn Provider>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strum::IntoEnumIterator;

    struct SlowProvider {
        breaker: CircuitBreaker,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for SlowProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::VendorApi
        }

        fn breaker(&self) -> &CircuitBreaker {
            &self.breaker
        }

        async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(DomainRecord::registered(domain, self.kind()))
        }
    }

    #[test]
    fn test_priority_follows_declaration_order() {
        let kinds: Vec<ProviderKind> = ProviderKind::iter().collect();
        assert_eq!(kinds[0], ProviderKind::Rdap);
        assert!(kinds.windows(2).all(|w| w[0].priority() < w[1].priority()));
    }

    #[test]
    fn test_kind_serializes_as_name() {
        for kind in ProviderKind::iter() {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[tokio::test]
    async fn test_deadline_stops_slow_call_without_tripping_breaker() {
        let provider = SlowProvider {
            breaker: CircuitBreaker::new("slow", 1, Duration::from_secs(30)),
            delay: Duration::from_secs(5),
            calls: AtomicUsize::new(0),
        };
        let ctx = RequestContext::new("test", Duration::from_millis(20));
        let err = provider
            .query(&ctx, "example.com", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(ProviderKind::VendorApi, _)));
        assert_eq!(provider.breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let provider = SlowProvider {
            breaker: CircuitBreaker::new("slow", 1, Duration::from_secs(30)),
            delay: Duration::from_millis(1),
            calls: AtomicUsize::new(0),
        };
        let _ = provider
            .breaker
            .call(|| async { Err::<(), _>("down") })
            .await;
        let ctx = RequestContext::new("test", Duration::from_secs(1));
        let err = provider
            .query(&ctx, "example.com", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_limit_trips_breaker_before_context_ends() {
        let provider = SlowProvider {
            breaker: CircuitBreaker::new("slow", 1, Duration::from_secs(30)),
            delay: Duration::from_secs(600),
            calls: AtomicUsize::new(0),
        };
        let ctx = RequestContext::new("test", Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let err = provider
            .query(&ctx, "example.com", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(ProviderKind::VendorApi, limit) if limit == Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!ctx.is_done());
        assert_eq!(provider.breaker.failure_count(), 1);
    }
}
