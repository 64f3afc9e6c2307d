//! Configuration types and CLI options.
//!
//! This module defines the enums and the `Config` struct used for command-line
//! and environment driven configuration.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::constants::{
    BREAKER_FAILURE_THRESHOLD, BREAKER_OPEN_DURATION, COMPARE_QUERY_TIMEOUT,
    DEDUPE_LOCK_TTL, DEFAULT_CACHE_NAMESPACE, DEFAULT_IANA_WHOIS_SERVER, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RDAP_BASE_URL, DEFAULT_WORKER_COUNT, DNS_QUERY_TIMEOUT, PROVIDER_CALL_TIMEOUT,
    STORE_OP_TIMEOUT, WHOIS_QUERY_TIMEOUT,
};

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Service configuration.
///
/// Every option can be given on the command line or through the matching
/// `DOMAIN_INTEL_*` environment variable (a `.env` file is loaded first by the
/// binary). The struct can also be built programmatically:
///
/// ```no_run
/// use domain_intel::Config;
///
/// let config = Config {
///     worker_count: 8,
///     queue_capacity: 16,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Parser)]
#[command(name = "domain_intel", version, about)]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "DOMAIN_INTEL_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Redis URL for the shared cache / limiter / lock store.
    /// When absent an in-process store is used (single instance only).
    #[arg(long, env = "DOMAIN_INTEL_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Per-operation timeout for the shared store, in milliseconds
    #[arg(long, env = "DOMAIN_INTEL_STORE_TIMEOUT_MS", default_value_t = STORE_OP_TIMEOUT.as_millis() as u64)]
    pub store_timeout_ms: u64,

    /// Number of long-lived worker tasks
    #[arg(long, env = "DOMAIN_INTEL_WORKERS", default_value_t = DEFAULT_WORKER_COUNT)]
    pub worker_count: usize,

    /// Jobs accepted beyond the busy workers before submissions are rejected
    #[arg(long, env = "DOMAIN_INTEL_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Best-result WHOIS/RDAP query timeout in seconds
    #[arg(long, env = "DOMAIN_INTEL_WHOIS_TIMEOUT", default_value_t = WHOIS_QUERY_TIMEOUT.as_secs())]
    pub whois_timeout_secs: u64,

    /// Ceiling on a single provider call in seconds
    #[arg(long, env = "DOMAIN_INTEL_PROVIDER_TIMEOUT", default_value_t = PROVIDER_CALL_TIMEOUT.as_secs())]
    pub provider_timeout_secs: u64,

    /// DNS lookup timeout in seconds
    #[arg(long, env = "DOMAIN_INTEL_DNS_TIMEOUT", default_value_t = DNS_QUERY_TIMEOUT.as_secs())]
    pub dns_timeout_secs: u64,

    /// Comparison query deadline in seconds
    #[arg(long, env = "DOMAIN_INTEL_COMPARE_TIMEOUT", default_value_t = COMPARE_QUERY_TIMEOUT.as_secs())]
    pub compare_timeout_secs: u64,

    /// Safety-net TTL for dedupe locks in seconds
    #[arg(long, env = "DOMAIN_INTEL_LOCK_TTL", default_value_t = DEDUPE_LOCK_TTL.as_secs())]
    pub lock_ttl_secs: u64,

    /// Requests allowed per client per window
    #[arg(long, env = "DOMAIN_INTEL_RATE", default_value_t = 60)]
    pub rate_limit: u32,

    /// Extra requests tolerated per window on top of the rate
    #[arg(long, env = "DOMAIN_INTEL_BURST", default_value_t = 10)]
    pub rate_limit_burst: u32,

    /// Rate-limit window length in seconds
    #[arg(long, env = "DOMAIN_INTEL_RATE_WINDOW", default_value_t = 60)]
    pub rate_limit_window_secs: u64,

    /// Tokens issued per client per window
    #[arg(long, env = "DOMAIN_INTEL_TOKEN_RATE", default_value_t = 5)]
    pub token_rate_limit: u32,

    /// Extra token issuances tolerated per window
    #[arg(long, env = "DOMAIN_INTEL_TOKEN_BURST", default_value_t = 0)]
    pub token_rate_limit_burst: u32,

    /// Token issuance window length in seconds
    #[arg(long, env = "DOMAIN_INTEL_TOKEN_WINDOW", default_value_t = 3600)]
    pub token_rate_limit_window_secs: u64,

    /// Consecutive provider failures before its circuit opens
    #[arg(long, env = "DOMAIN_INTEL_BREAKER_THRESHOLD", default_value_t = BREAKER_FAILURE_THRESHOLD)]
    pub breaker_failure_threshold: u32,

    /// Seconds an open circuit waits before letting a probe through
    #[arg(long, env = "DOMAIN_INTEL_BREAKER_OPEN_SECS", default_value_t = BREAKER_OPEN_DURATION.as_secs())]
    pub breaker_open_secs: u64,

    /// RDAP base URL; the domain is appended
    #[arg(long, env = "DOMAIN_INTEL_RDAP_URL", default_value = DEFAULT_RDAP_BASE_URL)]
    pub rdap_base_url: String,

    /// IANA WHOIS server (host:port) used for referral discovery
    #[arg(long, env = "DOMAIN_INTEL_IANA_WHOIS", default_value = DEFAULT_IANA_WHOIS_SERVER)]
    pub iana_whois_server: String,

    /// Vendor WHOIS API endpoint
    #[arg(long, env = "DOMAIN_INTEL_VENDOR_URL")]
    pub vendor_api_url: Option<String>,

    /// Vendor WHOIS API key; the vendor provider is only enabled when set
    #[arg(long, env = "DOMAIN_INTEL_VENDOR_KEY", hide_env_values = true)]
    pub vendor_api_key: Option<String>,

    /// Enable the DNS-probe provider as the last fallback
    #[arg(long, env = "DOMAIN_INTEL_DNS_PROBE", default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_dns_probe: bool,

    /// Namespace prefix for cache keys
    #[arg(long, env = "DOMAIN_INTEL_CACHE_NAMESPACE", default_value = DEFAULT_CACHE_NAMESPACE)]
    pub cache_namespace: String,

    /// Log level
    #[arg(long, env = "DOMAIN_INTEL_LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, env = "DOMAIN_INTEL_LOG_FORMAT", value_enum, default_value = "plain")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            redis_url: None,
            store_timeout_ms: STORE_OP_TIMEOUT.as_millis() as u64,
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            whois_timeout_secs: WHOIS_QUERY_TIMEOUT.as_secs(),
            provider_timeout_secs: PROVIDER_CALL_TIMEOUT.as_secs(),
            dns_timeout_secs: DNS_QUERY_TIMEOUT.as_secs(),
            compare_timeout_secs: COMPARE_QUERY_TIMEOUT.as_secs(),
            lock_ttl_secs: DEDUPE_LOCK_TTL.as_secs(),
            rate_limit: 60,
            rate_limit_burst: 10,
            rate_limit_window_secs: 60,
            token_rate_limit: 5,
            token_rate_limit_burst: 0,
            token_rate_limit_window_secs: 3600,
            breaker_failure_threshold: BREAKER_FAILURE_THRESHOLD,
            breaker_open_secs: BREAKER_OPEN_DURATION.as_secs(),
            rdap_base_url: DEFAULT_RDAP_BASE_URL.to_string(),
            iana_whois_server: DEFAULT_IANA_WHOIS_SERVER.to_string(),
            vendor_api_url: None,
            vendor_api_key: None,
            enable_dns_probe: true,
            cache_namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
        }
    }
}

/// Upper bound on worker tasks; beyond this the pool only adds scheduler churn
const MAX_WORKERS: usize = 4096;
/// Upper bound on any configured timeout
const MAX_TIMEOUT_SECS: u64 = 600;

impl Config {
    /// Checks the configuration for values the service cannot run with.
    ///
    /// Never panics, whatever the field values are.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 || self.worker_count > MAX_WORKERS {
            return Err(format!(
                "worker_count must be between 1 and {MAX_WORKERS}, got {}",
                self.worker_count
            ));
        }
        if self.queue_capacity > MAX_WORKERS * 16 {
            return Err(format!(
                "queue_capacity {} is unreasonably large",
                self.queue_capacity
            ));
        }
        if self.store_timeout_ms == 0 || self.store_timeout_ms > 10_000 {
            return Err(format!(
                "store_timeout_ms must be between 1 and 10000, got {}",
                self.store_timeout_ms
            ));
        }
        for (name, value) in [
            ("whois_timeout_secs", self.whois_timeout_secs),
            ("provider_timeout_secs", self.provider_timeout_secs),
            ("dns_timeout_secs", self.dns_timeout_secs),
            ("compare_timeout_secs", self.compare_timeout_secs),
            ("lock_ttl_secs", self.lock_ttl_secs),
            ("breaker_open_secs", self.breaker_open_secs),
        ] {
            if value == 0 || value > MAX_TIMEOUT_SECS {
                return Err(format!(
                    "{name} must be between 1 and {MAX_TIMEOUT_SECS}, got {value}"
                ));
            }
        }
        if self.rate_limit == 0 || self.rate_limit_window_secs == 0 {
            return Err("request rate limit and window must be non-zero".to_string());
        }
        if self.token_rate_limit == 0 || self.token_rate_limit_window_secs == 0 {
            return Err("token rate limit and window must be non-zero".to_string());
        }
        if self.breaker_failure_threshold == 0 {
            return Err("breaker_failure_threshold must be at least 1".to_string());
        }
        if url::Url::parse(&self.rdap_base_url).is_err() {
            return Err(format!("rdap_base_url is not a URL: {}", self.rdap_base_url));
        }
        if self.vendor_api_key.is_some() && self.vendor_api_url.is_none() {
            return Err("vendor_api_key is set but vendor_api_url is missing".to_string());
        }
        if self.cache_namespace.is_empty() || self.cache_namespace.contains(char::is_whitespace) {
            return Err("cache_namespace must be a non-empty token".to_string());
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn whois_timeout(&self) -> Duration {
        Duration::from_secs(self.whois_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn compare_timeout(&self) -> Duration {
        Duration::from_secs(self.compare_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn breaker_open_duration(&self) -> Duration {
        Duration::from_secs(self.breaker_open_secs)
    }
}
