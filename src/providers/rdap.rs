//! RDAP provider.
//!
//! Queries `{base}{domain}` (by default the rdap.org bootstrap redirector, which
//! forwards to the authoritative registry). A 404 means the registry has no
//! object for the name, which is reported as available.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::parse::parse_date_string;
use super::{DomainRecord, Provider, ProviderKind};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::HTTP_STATUS_NOT_FOUND;
use crate::error_handling::ProviderError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapDomain {
    #[serde(default)]
    ldh_name: Option<String>,
    #[serde(default)]
    status: Vec<String>,
    #[serde(default)]
    events: Vec<RdapEvent>,
    #[serde(default)]
    nameservers: Vec<RdapNameserver>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEvent {
    event_action: String,
    event_date: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapNameserver {
    #[serde(default)]
    ldh_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RdapEntity {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    vcard_array: Option<Value>,
}

pub struct RdapProvider {
    client: Arc<reqwest::Client>,
    base_url: String,
    breaker: CircuitBreaker,
}

impl RdapProvider {
    pub fn new(client: Arc<reqwest::Client>, base_url: impl Into<String>, breaker: CircuitBreaker) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            client,
            base_url,
            breaker,
        }
    }

    fn upstream(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::upstream(ProviderKind::Rdap, message)
    }
}

#[async_trait]
impl Provider for RdapProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Rdap
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
        let url = format!("{}{}", self.base_url, domain);
        log::debug!("RDAP query: {url}");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/rdap+json, application/json")
            .send()
            .await
            .map_err(|e| self.upstream(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == HTTP_STATUS_NOT_FOUND {
            log::debug!("RDAP: no object for {domain}");
            return Ok(DomainRecord::available(domain, ProviderKind::Rdap));
        }
        if !status.is_success() {
            return Err(self.upstream(format!("HTTP {status}")));
        }

        let body: RdapDomain = response
            .json()
            .await
            .map_err(|e| self.upstream(format!("invalid RDAP JSON: {e}")))?;
        Ok(rdap_to_record(domain, body))
    }
}

fn rdap_to_record(domain: &str, body: RdapDomain) -> DomainRecord {
    let mut record = DomainRecord::registered(domain, ProviderKind::Rdap);
    if let Some(ldh) = body.ldh_name.as_deref() {
        if !ldh.eq_ignore_ascii_case(domain) {
            log::debug!("RDAP returned object {ldh} for {domain}");
        }
    }

    for event in &body.events {
        let date = parse_date_string(&event.event_date);
        match event.event_action.to_lowercase().as_str() {
            "registration" => record.creation_date = date,
            "last changed" => record.updated_date = date,
            "expiration" => record.expiry_date = date,
            _ => {}
        }
    }

    record.status = body.status;
    record.name_servers = body
        .nameservers
        .into_iter()
        .filter_map(|ns| ns.ldh_name)
        .collect();
    record.normalize_name_servers();
    record.registrar = body
        .entities
        .iter()
        .filter(|e| e.roles.iter().any(|r| r == "registrar"))
        .find_map(|e| e.vcard_array.as_ref().and_then(vcard_full_name));
    record
}

/// Pulls the `fn` property out of a jCard: `["vcard", [["fn", {}, "text", "Name"], ...]]`.
fn vcard_full_name(vcard: &Value) -> Option<String> {
    vcard
        .get(1)?
        .as_array()?
        .iter()
        .find(|prop| prop.get(0).and_then(Value::as_str) == Some("fn"))
        .and_then(|prop| prop.get(3))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "objectClassName": "domain",
            "ldhName": "EXAMPLE.COM",
            "status": ["client delete prohibited", "client transfer prohibited"],
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2025-08-13T04:00:00Z"},
                {"eventAction": "last changed", "eventDate": "2024-08-14T07:01:34Z"}
            ],
            "nameservers": [
                {"objectClassName": "nameserver", "ldhName": "B.IANA-SERVERS.NET"},
                {"objectClassName": "nameserver", "ldhName": "A.IANA-SERVERS.NET"}
            ],
            "entities": [
                {"roles": ["technical"], "vcardArray": ["vcard", [["fn", {}, "text", "Tech Person"]]]},
                {"roles": ["registrar"], "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", "RESERVED-Internet Assigned Numbers Authority"]
                ]]}
            ]
        })
    }

    #[test]
    fn test_rdap_to_record() {
        let body: RdapDomain = serde_json::from_value(sample()).unwrap();
        let record = rdap_to_record("example.com", body);
        assert!(!record.available);
        assert_eq!(record.source_provider, ProviderKind::Rdap);
        assert_eq!(
            record.registrar.as_deref(),
            Some("RESERVED-Internet Assigned Numbers Authority")
        );
        assert_eq!(record.name_servers, vec!["a.iana-servers.net", "b.iana-servers.net"]);
        assert_eq!(record.status.len(), 2);
        assert_eq!(
            record.expiry_date.unwrap().format("%Y-%m-%d").to_string(),
            "2025-08-13"
        );
        assert!(record.updated_date.is_some());
    }

    #[test]
    fn test_minimal_body_still_parses() {
        let body: RdapDomain = serde_json::from_value(json!({"ldhName": "example.org"})).unwrap();
        let record = rdap_to_record("example.org", body);
        assert!(!record.available);
        assert!(record.registrar.is_none());
        assert!(record.name_servers.is_empty());
    }
}
