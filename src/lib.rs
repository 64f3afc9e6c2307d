//! domain_intel library: a resilient domain-intelligence query engine
//!
//! Given a domain name, the engine asks registration-data providers (RDAP,
//! port-43 WHOIS, a vendor WHOIS API, a DNS delegation probe) for who holds it,
//! normalizes and caches the answer, and returns it within a bounded time
//! budget even when upstreams are slow or down.
//!
//! The moving parts:
//! - [`worker_pool::WorkerPool`]: bounded pool that rejects instead of blocking
//! - [`circuit_breaker::CircuitBreaker`]: one per provider
//! - [`manager::ProviderManager`]: ordered fallback and comparison fan-out
//! - [`rate_limit::RateLimiter`]: fixed-window counters on the shared store
//! - [`cache::CacheStore`] and [`cache::DedupeLock`]: read-through cache and
//!   at-most-one fetch per key
//! - [`orchestrator::RequestOrchestrator`]: the per-request state machine
//!
//! # Example
//!
//! ```no_run
//! use domain_intel::{run_server, Config};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = Config {
//!     redis_url: Some("redis://127.0.0.1:6379".to_string()),
//!     ..Default::default()
//! };
//! run_server(config).await
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod dns;
pub mod domain;
pub mod error_handling;
pub mod initialization;
pub mod manager;
pub mod orchestrator;
pub mod providers;
pub mod rate_limit;
pub mod server;
pub mod store;
pub mod worker_pool;

// Re-export public API
pub use config::{Config, LogFormat, LogLevel};
pub use context::RequestContext;
pub use error_handling::{ProviderError, QueryError, StoreError};
pub use manager::{Comparison, ComparisonSummary, ProviderManager, QueryOutcome};
pub use orchestrator::{RequestOrchestrator, Services};
pub use providers::{DomainRecord, Provider, ProviderKind};
pub use server::run_server;
