//! Commercial WHOIS API provider.
//!
//! Speaks the widely used `WhoisRecord` JSON shape:
//! `GET {url}?apiKey=..&domainName=..&outputFormat=JSON`. Only registered
//! when an API key is configured.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::parse::parse_date_string;
use super::{DomainRecord, Provider, ProviderKind};
use crate::circuit_breaker::CircuitBreaker;
use crate::error_handling::ProviderError;

/// `dataError` value meaning the registry has no record.
const MISSING_WHOIS_DATA: &str = "MISSING_WHOIS_DATA";

#[derive(Debug, Deserialize)]
struct VendorResponse {
    #[serde(rename = "WhoisRecord")]
    whois_record: Option<WhoisRecord>,
    #[serde(rename = "ErrorMessage")]
    error_message: Option<VendorErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct VendorErrorMessage {
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhoisRecord {
    #[serde(default)]
    registrar_name: Option<String>,
    #[serde(default)]
    created_date: Option<String>,
    #[serde(default)]
    updated_date: Option<String>,
    #[serde(default)]
    expires_date: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    name_servers: Option<NameServers>,
    #[serde(default)]
    data_error: Option<String>,
    #[serde(default)]
    registry_data: Option<Box<WhoisRecord>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameServers {
    #[serde(default)]
    host_names: Vec<String>,
}

pub struct VendorApiProvider {
    client: Arc<reqwest::Client>,
    url: String,
    api_key: String,
    breaker: CircuitBreaker,
}

impl VendorApiProvider {
    pub fn new(
        client: Arc<reqwest::Client>,
        url: impl Into<String>,
        api_key: impl Into<String>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            breaker,
        }
    }

    fn upstream(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::upstream(ProviderKind::VendorApi, message)
    }
}

#[async_trait]
impl Provider for VendorApiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::VendorApi
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("domainName", domain),
                ("outputFormat", "JSON"),
            ])
            .send()
            .await
            .map_err(|e| self.upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.upstream(format!("HTTP {status}")));
        }

        let body: VendorResponse = response
            .json()
            .await
            .map_err(|e| self.upstream(format!("invalid JSON: {e}")))?;

        if let Some(err) = body.error_message {
            return Err(self.upstream(format!("API error: {}", err.msg)));
        }
        let record = body
            .whois_record
            .ok_or_else(|| self.upstream("response has no WhoisRecord"))?;
        Ok(whois_record_to_domain(domain, record))
    }
}

fn whois_record_to_domain(domain: &str, record: WhoisRecord) -> DomainRecord {
    if record.data_error.as_deref() == Some(MISSING_WHOIS_DATA) {
        return DomainRecord::available(domain, ProviderKind::VendorApi);
    }
    let registry = *record.registry_data.unwrap_or_default();

    let mut out = DomainRecord::registered(domain, ProviderKind::VendorApi);
    out.registrar = record.registrar_name.or(registry.registrar_name);
    out.creation_date = record
        .created_date
        .or(registry.created_date)
        .as_deref()
        .and_then(parse_date_string);
    out.updated_date = record
        .updated_date
        .or(registry.updated_date)
        .as_deref()
        .and_then(parse_date_string);
    out.expiry_date = record
        .expires_date
        .or(registry.expires_date)
        .as_deref()
        .and_then(parse_date_string);
    out.status = record
        .status
        .or(registry.status)
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    out.name_servers = record
        .name_servers
        .or(registry.name_servers)
        .map(|ns| ns.host_names)
        .unwrap_or_default();
    out.normalize_name_servers();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_data_fills_gaps() {
        let body: VendorResponse = serde_json::from_value(json!({
            "WhoisRecord": {
                "domainName": "example.com",
                "registrarName": "Example Registrar, Inc.",
                "status": "clientTransferProhibited clientUpdateProhibited",
                "registryData": {
                    "createdDate": "1995-08-14T04:00:00Z",
                    "expiresDate": "2025-08-13T04:00:00Z",
                    "nameServers": {"hostNames": ["NS2.EXAMPLE.COM", "NS1.EXAMPLE.COM"]}
                }
            }
        }))
        .unwrap();
        let record = whois_record_to_domain("example.com", body.whois_record.unwrap());
        assert_eq!(record.registrar.as_deref(), Some("Example Registrar, Inc."));
        assert_eq!(record.status, vec!["clientTransferProhibited", "clientUpdateProhibited"]);
        assert_eq!(record.name_servers, vec!["ns1.example.com", "ns2.example.com"]);
        assert!(record.creation_date.is_some());
        assert!(record.expiry_date.is_some());
    }

    #[test]
    fn test_missing_data_is_available() {
        let body: VendorResponse = serde_json::from_value(json!({
            "WhoisRecord": {"domainName": "nothing-here.com", "dataError": "MISSING_WHOIS_DATA"}
        }))
        .unwrap();
        let record = whois_record_to_domain("nothing-here.com", body.whois_record.unwrap());
        assert!(record.available);
        assert_eq!(record.source_provider, ProviderKind::VendorApi);
    }
}
