//! DNS resolver initialization.

use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

/// Initializes the shared DNS resolver.
///
/// Uses the default upstream configuration with a short per-attempt timeout so
/// a slow nameserver fails fast instead of eating the request's budget.
pub fn init_resolver(attempt_timeout: Duration) -> Arc<TokioAsyncResolver> {
    let mut opts = ResolverOpts::default();
    opts.timeout = attempt_timeout;
    opts.attempts = 2;
    // Never append search domains to the queried name
    opts.ndots = 0;

    Arc::new(TokioAsyncResolver::tokio(ResolverConfig::default(), opts))
}
