//! Configuration constants.
//!
//! This module defines the constants used throughout the service: timeouts,
//! cache TTLs, store key prefixes and default upstream endpoints.

use std::time::Duration;

// Timeout tiers
/// Budget for a single best-result WHOIS/RDAP query (all fallbacks included)
pub const WHOIS_QUERY_TIMEOUT: Duration = Duration::from_secs(15);
/// Budget for a DNS record lookup
pub const DNS_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Overall deadline for a multi-provider comparison query
pub const COMPARE_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Ceiling on one provider's upstream call, WHOIS referrals included
pub const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// Floor on a provider's share of a best-result budget
pub const MIN_PROVIDER_SLICE: Duration = Duration::from_millis(500);
/// Comparisons stop collecting this long before the caller's deadline
pub const COMPARE_COLLECT_MARGIN: Duration = Duration::from_millis(200);
/// Per-operation timeout for the shared key-value store
/// Kept well below a second so a limiter/cache outage cannot stall a request
pub const STORE_OP_TIMEOUT: Duration = Duration::from_millis(500);
/// TCP connect timeout for port-43 WHOIS servers
pub const WHOIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// DNS resolver per-attempt timeout in seconds
pub const DNS_TIMEOUT_SECS: u64 = 5;

// Dedupe locks
/// Safety-net TTL of a dedupe lock if its owner never releases it
pub const DEDUPE_LOCK_TTL: Duration = Duration::from_secs(30);
/// Key prefix for dedupe locks (`processing:{op}:{domain}`)
pub const DEDUPE_KEY_PREFIX: &str = "processing";

// Cache
/// Default namespace for cache keys (`{namespace}:{recordType}:{domain}`)
pub const DEFAULT_CACHE_NAMESPACE: &str = "domain_intel";
/// TTL for a registered domain's registration data
pub const CACHE_TTL_REGISTERED: Duration = Duration::from_secs(24 * 60 * 60);
/// TTL for an available / not-found result
pub const CACHE_TTL_AVAILABLE: Duration = Duration::from_secs(60 * 60);
/// TTL for DNS record sets
pub const CACHE_TTL_DNS: Duration = Duration::from_secs(30 * 60);

// Worker pool
/// Default number of long-lived worker tasks
pub const DEFAULT_WORKER_COUNT: usize = 32;
/// Default number of queued jobs accepted beyond the busy workers
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

// Rate limiting
/// Key scope for inbound query limiting
pub const RATE_LIMIT_SCOPE_REQUESTS: &str = "ratelimit:req";
/// Key scope for token issuance limiting
pub const RATE_LIMIT_SCOPE_TOKENS: &str = "ratelimit:token";

// Circuit breaker
/// Consecutive failures before a provider's circuit opens
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;
/// How long an open circuit short-circuits calls before allowing a probe
pub const BREAKER_OPEN_DURATION: Duration = Duration::from_secs(30);

// Upstreams
/// RDAP bootstrap redirector; it forwards to the authoritative registry server
pub const DEFAULT_RDAP_BASE_URL: &str = "https://rdap.org/domain/";
/// IANA WHOIS server used to discover the authoritative server for a TLD
pub const DEFAULT_IANA_WHOIS_SERVER: &str = "whois.iana.org:43";
/// Standard WHOIS port
pub const WHOIS_PORT: u16 = 43;
/// Maximum WHOIS response size read from a port-43 server (256 KiB)
pub const MAX_WHOIS_RESPONSE_BYTES: usize = 256 * 1024;

/// User-Agent sent to HTTP upstreams.
pub const DEFAULT_USER_AGENT: &str = concat!("domain_intel/", env!("CARGO_PKG_VERSION"));

// Redis connection
/// Initial delay in milliseconds before retrying the Redis connection at startup
pub const REDIS_CONNECT_INITIAL_DELAY_MS: u64 = 200;
/// Maximum number of Redis connection attempts at startup
pub const REDIS_CONNECT_MAX_ATTEMPTS: usize = 4;

// HTTP status codes (for clarity and consistency)
pub const HTTP_STATUS_NOT_FOUND: u16 = 404;
pub const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;
/// Non-standard "client closed request" status
pub const HTTP_STATUS_CLIENT_CLOSED: u16 = 499;

// Tokens
/// Lifetime of an issued API token
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
