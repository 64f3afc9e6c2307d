//! Legacy WHOIS provider (TCP port 43).
//!
//! Server discovery asks the IANA WHOIS server for the TLD's `refer:` line and
//! remembers the answer per TLD for the life of the process. A registry
//! response that names a registrar WHOIS server is followed once; the
//! registrar's fields take precedence and the registry fills the gaps.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::parse::{parse_iana_referral, parse_whois_text};
use super::{DomainRecord, Provider, ProviderKind};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{MAX_WHOIS_RESPONSE_BYTES, WHOIS_CONNECT_TIMEOUT, WHOIS_PORT};
use crate::domain::tld_of;
use crate::error_handling::ProviderError;

pub struct WhoisProvider {
    iana_server: String,
    timeout: Duration,
    breaker: CircuitBreaker,
    /// TLD -> authoritative WHOIS server
    servers: Mutex<HashMap<String, String>>,
}

impl WhoisProvider {
    pub fn new(iana_server: impl Into<String>, timeout: Duration, breaker: CircuitBreaker) -> Self {
        Self {
            iana_server: iana_server.into(),
            timeout,
            breaker,
            servers: Mutex::new(HashMap::new()),
        }
    }

    fn upstream(&self, message: impl Into<String>) -> ProviderError {
        ProviderError::upstream(ProviderKind::LegacyWhois, message)
    }

    fn cached_server(&self, tld: &str) -> Option<String> {
        match self.servers.lock() {
            Ok(servers) => servers.get(tld).cloned(),
            Err(poisoned) => poisoned.into_inner().get(tld).cloned(),
        }
    }

    fn remember_server(&self, tld: &str, server: &str) {
        let mut servers = match self.servers.lock() {
            Ok(servers) => servers,
            Err(poisoned) => poisoned.into_inner(),
        };
        servers.insert(tld.to_string(), server.to_string());
    }

    async fn server_for_tld(&self, tld: &str) -> Result<String, ProviderError> {
        if let Some(server) = self.cached_server(tld) {
            return Ok(server);
        }
        let answer = self.query_server(&self.iana_server, tld).await?;
        let server = parse_iana_referral(&answer)
            .ok_or_else(|| self.upstream(format!("IANA has no WHOIS server for .{tld}")))?;
        log::debug!("WHOIS server for .{tld}: {server}");
        self.remember_server(tld, &server);
        Ok(server)
    }

    async fn query_server(&self, server: &str, query: &str) -> Result<String, ProviderError> {
        let address = with_default_port(server);
        let exchange = async {
            let mut stream = tokio::time::timeout(WHOIS_CONNECT_TIMEOUT, TcpStream::connect(&address))
                .await
                .map_err(|_| format!("connect to {address} timed out"))?
                .map_err(|e| format!("connect to {address} failed: {e}"))?;
            stream
                .write_all(format!("{query}\r\n").as_bytes())
                .await
                .map_err(|e| format!("write to {address} failed: {e}"))?;

            let mut body = Vec::new();
            stream
                .take(MAX_WHOIS_RESPONSE_BYTES as u64)
                .read_to_end(&mut body)
                .await
                .map_err(|e| format!("read from {address} failed: {e}"))?;
            Ok::<_, String>(String::from_utf8_lossy(&body).into_owned())
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(message)) => Err(self.upstream(message)),
            Err(_) => Err(ProviderError::Timeout(ProviderKind::LegacyWhois, self.timeout)),
        }
    }
}

#[async_trait]
impl Provider for WhoisProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LegacyWhois
    }

    fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn fetch(&self, domain: &str) -> Result<DomainRecord, ProviderError> {
        let tld = tld_of(domain);
        let registry_server = self.server_for_tld(tld).await?;
        let registry_text = self.query_server(&registry_server, domain).await?;
        let mut fields = parse_whois_text(&registry_text);

        if fields.not_found && !fields.has_details() {
            return Ok(fields.into_record(domain, ProviderKind::LegacyWhois));
        }

        if let Some(referral) = fields.referral.take() {
            if !referral.eq_ignore_ascii_case(&registry_server) {
                match self.query_server(&referral, domain).await {
                    Ok(text) => {
                        let mut registrar_fields = parse_whois_text(&text);
                        registrar_fields.merge_missing(fields);
                        fields = registrar_fields;
                    }
                    // The registry answer is still usable on its own
                    Err(e) => log::debug!("Registrar WHOIS referral to {referral} failed: {e}"),
                }
            }
        }

        if !fields.has_details() && !fields.not_found {
            return Err(self.upstream(format!("unrecognized WHOIS response from {registry_server}")));
        }
        Ok(fields.into_record(domain, ProviderKind::LegacyWhois))
    }
}

fn with_default_port(server: &str) -> String {
    let server = server
        .trim()
        .trim_start_matches("whois://")
        .trim_end_matches('/');
    // A bare or bracketed IP literal carries no port; IPv6 needs brackets
    if let Ok(ip) = server.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return SocketAddr::new(ip, WHOIS_PORT).to_string();
    }
    if server.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        server.to_string()
    } else {
        format!("{server}:{WHOIS_PORT}")
    }
}
