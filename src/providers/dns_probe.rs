//! DNS delegation probe.
//!
//! The cheapest provider and the last resort: a domain with NS records is
//! delegated and therefore registered, NXDOMAIN suggests it is free. No
//! registrar or dates are available this way.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DomainRecord, Provider, ProviderKind};
use crate::circuit_breaker::CircuitBreaker;
use crate::dns::{DnsError, DnsLookup};
use crate::error_handling::ProviderError;

pub struct DnsProbeProvider {
    dns: Arc<DnsLookup>,
    breaker: CircuitBreaker,
}

impl DnsProbeProvider {
    pub fn new(dns: Arc<DnsLookup>, breaker: CircuitBreaker) -> Self {
        Self { dns, breaker }
    }
}

#[async_trait]
impl Provider for DnsProbeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DnsProbe
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
        probe_outcome(domain, self.dns.name_servers(domain).await)
    }
}

fn probe_outcome(domain: &str, lookup: Result<Vec<String>, DnsError>) -> Result<DomainRecord, ProviderError> {
    match lookup {
        Ok(name_servers) if !name_servers.is_empty() => {
            let mut record = DomainRecord::registered(domain, ProviderKind::DnsProbe);
            record.status_message = "Registered (NS records present)".to_string();
            record.name_servers = name_servers;
            record.normalize_name_servers();
            Ok(record)
        }
        Ok(_) => Err(ProviderError::upstream(
            ProviderKind::DnsProbe,
            format!("{domain} exists but has no NS records"),
        )),
        Err(DnsError::NxDomain(_)) => Ok(DomainRecord::available(domain, ProviderKind::DnsProbe)),
        Err(e) => Err(ProviderError::upstream(ProviderKind::DnsProbe, e.to_string())),
    }
}
