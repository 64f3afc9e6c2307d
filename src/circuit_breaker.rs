//! Circuit breaker for upstream provider calls.
//!
//! Prevents hammering a failing upstream. After N consecutive failures the
//! circuit opens and every call short-circuits until the open duration expires.
//! The next call after that is let through as a single half-open probe: success
//! closes the circuit, failure reopens it and restarts the timer. Callers that
//! arrive while a probe is in flight are short-circuited.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Result of a guarded call.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// When the state last changed; the open timer runs from here
    changed_at: Instant,
    /// Bumped on every state change; permits from an older epoch are ignored
    generation: u64,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.changed_at = Instant::now();
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Per-upstream circuit breaker.
///
/// State is mutated only under the internal mutex, which is never held across
/// an `.await`.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    failure_threshold: u32,
    open_duration: Duration,
    inner: Arc<Mutex<BreakerInner>>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("failures", &self.failure_count())
            .finish()
    }
}

/// Admission ticket for one call, tied to the state epoch it was issued in.
///
/// An outcome that arrives after the breaker changed state (a slow call
/// admitted while closed, settling during a half-open probe) is ignored.
/// Dropping a probe permit without an outcome (the caller's future was
/// cancelled) frees the probe slot so the breaker cannot wait forever on a
/// probe that will never report.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    is_probe: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.generation);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.generation);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.is_probe {
            let mut inner = self.breaker.lock();
            if inner.generation == self.generation {
                inner.probe_in_flight = false;
            }
        }
    }
}

impl CircuitBreaker {
    /// Creates a new circuit breaker.
    ///
    /// # Arguments
    ///
    /// * `name` - Upstream name used in log lines
    /// * `failure_threshold` - Number of consecutive failures before opening circuit
    /// * `open_duration` - How long to short-circuit before allowing a probe
    pub fn new(name: impl Into<Arc<str>>, failure_threshold: u32, open_duration: Duration) -> Self {
        CircuitBreaker {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            open_duration,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                changed_at: Instant::now(),
                generation: 0,
                probe_in_flight: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // A poisoned breaker is still a valid breaker: the state is plain data
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `operation` through the breaker.
    ///
    /// Returns `BreakerError::Open` without polling the operation when the
    /// circuit is open, or when half-open with a probe already in flight.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(BreakerError::Open)?;
        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                permit.failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(CallPermit {
                breaker: self,
                generation: inner.generation,
                is_probe: false,
                settled: false,
            }),
            CircuitState::Open => {
                if inner.changed_at.elapsed() < self.open_duration {
                    return None;
                }
                log::info!(
                    "Circuit breaker {}: open duration elapsed, letting one probe through",
                    self.name
                );
                inner.transition(CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Some(CallPermit {
                    breaker: self,
                    generation: inner.generation,
                    is_probe: true,
                    settled: false,
                })
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return None;
                }
                inner.probe_in_flight = true;
                Some(CallPermit {
                    breaker: self,
                    generation: inner.generation,
                    is_probe: true,
                    settled: false,
                })
            }
        }
    }

    /// Records a successful call admitted in epoch `generation`.
    ///
    /// Resets the failure count and closes the circuit if it was half-open.
    fn record_success(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            log::debug!("Circuit breaker {}: ignoring outcome from an earlier state", self.name);
            return;
        }
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.transition(CircuitState::Closed);
            log::info!("Circuit breaker {}: probe succeeded, circuit closed", self.name);
        }
    }

    /// Records a failed call admitted in epoch `generation`.
    ///
    /// Opens the circuit once the threshold is reached; a failed half-open
    /// probe reopens it immediately and restarts the timer.
    fn record_failure(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation {
            log::debug!("Circuit breaker {}: ignoring outcome from an earlier state", self.name);
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open);
                log::error!(
                    "Circuit breaker {}: probe failed, circuit reopened (cooldown: {}s)",
                    self.name,
                    self.open_duration.as_secs()
                );
            }
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.transition(CircuitState::Open);
                log::error!(
                    "Circuit breaker {}: circuit opened after {} consecutive failures (cooldown: {}s)",
                    self.name,
                    inner.consecutive_failures,
                    self.open_duration.as_secs()
                );
            }
            _ => {}
        }
    }

    /// Current state, reporting `HalfOpen` once an open circuit's timer has run
    /// out even if no call has arrived yet.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        if inner.state == CircuitState::Open && inner.changed_at.elapsed() >= self.open_duration {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    /// Gets the current consecutive failure count (for monitoring).
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
