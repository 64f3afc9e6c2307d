//! DNS lookups.
//!
//! A thin service over the shared hickory resolver, used by the DNS endpoint
//! (full record set) and by the DNS probe provider (NS only).

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{Cacheable, RecordType};

mod records;

pub use records::{
    lookup_a_records, lookup_aaaa_records, lookup_mx_records, lookup_ns_records,
    lookup_txt_records,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    #[error("{0} does not exist (NXDOMAIN)")]
    NxDomain(String),
    #[error("DNS lookup for {0} timed out")]
    Timeout(String),
    #[error("DNS lookup failed: {0}")]
    Resolve(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

/// All record sets for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecords {
    pub domain: String,
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub mx: Vec<MxRecord>,
    pub ns: Vec<String>,
    pub txt: Vec<String>,
    /// Record types whose lookup failed; such a result is not cached
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub lookup_time_ms: u64,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl DnsRecords {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Cacheable for DnsRecords {
    const RECORD_TYPE: RecordType = RecordType::Dns;

    fn stamp_stored(&mut self, at: DateTime<Utc>) {
        self.is_cached = false;
        self.cache_time = None;
        self.cached_at = Some(at);
    }

    fn mark_cached(&mut self, read_at: DateTime<Utc>) {
        self.is_cached = true;
        self.cache_time = Some(read_at);
    }
}

#[derive(Clone)]
pub struct DnsLookup {
    resolver: Arc<TokioAsyncResolver>,
}

impl DnsLookup {
    pub fn new(resolver: Arc<TokioAsyncResolver>) -> Self {
        Self { resolver }
    }

    pub async fn name_servers(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        lookup_ns_records(domain, &self.resolver).await
    }

    /// Runs the five lookups concurrently.
    ///
    /// Fails on NXDOMAIN or when every lookup failed; otherwise individual
    /// failures are listed in `errors`.
    pub async fn lookup_all(&self, domain: &str) -> Result<DnsRecords, DnsError> {
        let started = Instant::now();
        let resolver = &self.resolver;
        let (a, aaaa, mx, ns, txt) = tokio::join!(
            lookup_a_records(domain, resolver),
            lookup_aaaa_records(domain, resolver),
            lookup_mx_records(domain, resolver),
            lookup_ns_records(domain, resolver),
            lookup_txt_records(domain, resolver),
        );

        let outcomes: [(&str, Option<&DnsError>); 5] = [
            ("A", a.as_ref().err()),
            ("AAAA", aaaa.as_ref().err()),
            ("MX", mx.as_ref().err()),
            ("NS", ns.as_ref().err()),
            ("TXT", txt.as_ref().err()),
        ];
        if let Some((_, Some(nx))) = outcomes
            .iter()
            .find(|(_, err)| matches!(err, Some(DnsError::NxDomain(_))))
        {
            return Err((*nx).clone());
        }
        let errors: Vec<String> = outcomes
            .iter()
            .filter_map(|(kind, err)| err.map(|e| format!("{kind}: {e}")))
            .collect();
        if errors.len() == outcomes.len() {
            return Err(a.err().unwrap_or_else(|| DnsError::Resolve("all lookups failed".to_string())));
        }

        Ok(DnsRecords {
            domain: domain.to_string(),
            a: a.unwrap_or_default(),
            aaaa: aaaa.unwrap_or_default(),
            mx: mx.unwrap_or_default(),
            ns: ns.unwrap_or_default(),
            txt: txt.unwrap_or_default(),
            errors,
            lookup_time_ms: started.elapsed().as_millis() as u64,
            is_cached: false,
            cache_time: None,
            cached_at: None,
        })
    }
}
