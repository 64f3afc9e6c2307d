//! Per-request context.
//!
//! A `RequestContext` is created once per inbound request and passed by
//! reference through rate limiting, cache lookups, job submission and provider
//! calls. It carries the client identity, a cancellation token and an absolute
//! deadline; everything that can block on the network selects on
//! [`RequestContext::done`].

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDone {
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    identity: String,
    cancel: CancellationToken,
    deadline: Instant,
    budget: Duration,
}

impl RequestContext {
    /// Creates a context for `identity` that expires `timeout` from now.
    pub fn new(identity: impl Into<String>, timeout: Duration) -> Self {
        let request_id = format!("{:016x}", rand::rng().random::<u64>());
        Self {
            request_id,
            identity: identity.into(),
            cancel: CancellationToken::new(),
            deadline: Instant::now() + timeout,
            budget: timeout,
        }
    }

    /// Derives a context sharing identity and cancellation, with a deadline no
    /// later than the parent's.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = candidate.min(self.deadline);
        Self {
            request_id: self.request_id.clone(),
            identity: self.identity.clone(),
            cancel: self.cancel.child_token(),
            deadline,
            budget: timeout.min(self.budget),
        }
    }

    /// Derives a context for background work on behalf of this request.
    ///
    /// Cancellation still propagates from the parent, but the deadline is a
    /// fresh `timeout` from now, so the work may outlive the caller's wait.
    pub fn detached(&self, timeout: Duration) -> Self {
        Self {
            request_id: self.request_id.clone(),
            identity: self.identity.clone(),
            cancel: self.cancel.child_token(),
            deadline: Instant::now() + timeout,
            budget: timeout,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The timeout this context was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Non-blocking check, used by workers before starting a job.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Resolves when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextDone {
        tokio::select! {
            _ = self.cancel.cancelled() => ContextDone::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => ContextDone::DeadlineExceeded,
        }
    }
}
