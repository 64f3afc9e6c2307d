//! HTTP handlers.

mod metrics;
mod query;
mod status;

pub use metrics::metrics_handler;
pub use query::{compare_handler, dns_handler, health_handler, token_handler, whois_handler};
pub use status::status_handler;
