//! Startup resource setup.
//!
//! Everything here runs once, before the first request:
//! - logger
//! - rustls crypto provider
//! - HTTP client for the RDAP and vendor providers
//! - DNS resolver
//! - shared key-value store (Redis, or in-process)
//!
//! All fallible functions return [`InitializationError`](crate::error_handling::InitializationError).

mod client;
mod logger;
mod resolver;
mod store;

use rustls::crypto::{ring::default_provider, CryptoProvider};

pub use client::init_client;
pub use logger::init_logger_with;
pub use resolver::init_resolver;
pub use store::init_store;

/// Installs the process-wide `rustls` crypto provider.
///
/// Must run before the first TLS connection.
pub fn init_crypto_provider() {
    // Already installed is fine
    let _ = CryptoProvider::install_default(default_provider());
}
