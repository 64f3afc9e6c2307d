// Shared test helpers: a scripted port-43 WHOIS server and service wiring.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use domain_intel::circuit_breaker::CircuitBreaker;
use domain_intel::dns::DnsLookup;
use domain_intel::initialization::{init_client, init_resolver};
use domain_intel::providers::{RdapProvider, SharedProvider, VendorApiProvider, WhoisProvider};
use domain_intel::store::MemoryStore;
use domain_intel::{Config, ProviderKind, RequestOrchestrator, Services};

/// Registry answer served for any domain query.
#[allow(dead_code)]
pub const REGISTRY_RESPONSE: &str = "Domain Name: EXAMPLE.COM\r\n\
Registrar: Example Registrar, Inc.\r\n\
Creation Date: 1995-08-14T04:00:00Z\r\n\
Registry Expiry Date: 2030-08-13T04:00:00Z\r\n\
Domain Status: clientTransferProhibited https://icann.org/epp#clientTransferProhibited\r\n\
Name Server: A.IANA-SERVERS.NET\r\n\
Name Server: B.IANA-SERVERS.NET\r\n";

/// A WHOIS server on localhost that acts as both IANA and the registry.
///
/// A bare TLD query gets a `refer:` pointing back at itself; anything else
/// gets [`REGISTRY_RESPONSE`].
pub struct FakeWhois {
    pub addr: SocketAddr,
    queries: Arc<AtomicUsize>,
}

impl FakeWhois {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake WHOIS server");
        let addr = listener.local_addr().expect("local addr");
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = queries.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut line = String::new();
                    if BufReader::new(read).read_line(&mut line).await.is_err() {
                        return;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let query = line.trim();
                    let answer = if query.contains('.') {
                        REGISTRY_RESPONSE.to_string()
                    } else {
                        format!("% IANA WHOIS server\r\n\r\ndomain: {}\r\nrefer: {addr}\r\n", query.to_uppercase())
                    };
                    let _ = write.write_all(answer.as_bytes()).await;
                    let _ = write.shutdown().await;
                });
            }
        });

        Self { addr, queries }
    }

    #[allow(dead_code)]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
pub fn test_config() -> Config {
    Config {
        worker_count: 4,
        queue_capacity: 8,
        whois_timeout_secs: 5,
        rate_limit: 1000,
        rate_limit_window_secs: 60,
        ..Default::default()
    }
}

pub fn breaker(kind: ProviderKind) -> CircuitBreaker {
    CircuitBreaker::new(kind.name(), 5, Duration::from_secs(30))
}

#[allow(dead_code)]
pub fn rdap(base_url: &str) -> SharedProvider {
    let client = init_client(Duration::from_secs(5)).expect("client");
    Arc::new(RdapProvider::new(client, base_url, breaker(ProviderKind::Rdap)))
}

#[allow(dead_code)]
pub fn whois(server: SocketAddr) -> SharedProvider {
    Arc::new(WhoisProvider::new(
        server.to_string(),
        Duration::from_secs(5),
        breaker(ProviderKind::LegacyWhois),
    ))
}

#[allow(dead_code)]
pub fn vendor(url: &str) -> SharedProvider {
    let client = init_client(Duration::from_secs(5)).expect("client");
    Arc::new(VendorApiProvider::new(
        client,
        url,
        "test-key",
        breaker(ProviderKind::VendorApi),
    ))
}

/// Wires an orchestrator over an in-memory store.
#[allow(dead_code)]
pub fn orchestrator(config: Config, providers: Vec<SharedProvider>) -> RequestOrchestrator {
    let store = Arc::new(MemoryStore::new());
    let dns = Arc::new(DnsLookup::new(init_resolver(Duration::from_secs(1))));
    RequestOrchestrator::new(Arc::new(Services::from_parts(config, store, providers, dns)))
}
