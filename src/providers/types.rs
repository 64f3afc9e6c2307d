//! Normalized provider result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProviderKind;
use crate::cache::{Cacheable, RecordType};
use crate::config::HTTP_STATUS_NOT_FOUND;

/// Registration data for one domain, as returned by any provider.
///
/// Immutable once produced; the cache only ever touches `cached_at`,
/// `is_cached` and `cache_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub domain: String,
    pub available: bool,
    #[serde(default)]
    pub registrar: Option<String>,
    #[serde(default)]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub name_servers: Vec<String>,
    pub source_provider: ProviderKind,
    pub status_code: u16,
    pub status_message: String,
    #[serde(default)]
    pub is_cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl DomainRecord {
    /// A registered domain with no details filled in yet.
    pub fn registered(domain: &str, source: ProviderKind) -> Self {
        Self::blank(domain, source, false, 200, "Domain is registered")
    }

    /// A domain the upstream reports as not registered.
    pub fn available(domain: &str, source: ProviderKind) -> Self {
        Self::blank(
            domain,
            source,
            true,
            HTTP_STATUS_NOT_FOUND,
            "Domain not found, likely available",
        )
    }

    fn blank(domain: &str, source: ProviderKind, available: bool, code: u16, message: &str) -> Self {
        DomainRecord {
            domain: domain.to_string(),
            available,
            registrar: None,
            creation_date: None,
            updated_date: None,
            expiry_date: None,
            status: Vec::new(),
            name_servers: Vec::new(),
            source_provider: source,
            status_code: code,
            status_message: message.to_string(),
            is_cached: false,
            cache_time: None,
            cached_at: None,
        }
    }

    /// Sorted, deduplicated, lowercase name servers without trailing dots.
    pub fn normalize_name_servers(&mut self) {
        let mut servers: Vec<String> = self
            .name_servers
            .iter()
            .map(|ns| ns.trim().trim_end_matches('.').to_lowercase())
            .filter(|ns| !ns.is_empty())
            .collect();
        servers.sort();
        servers.dedup();
        self.name_servers = servers;
    }
}

impl Cacheable for DomainRecord {
    const RECORD_TYPE: RecordType = RecordType::Whois;

    fn is_negative(&self) -> bool {
        self.available
    }

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
