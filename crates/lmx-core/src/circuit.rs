//! C2 — `CircuitBreaker`: a three-state health gate for any remote or
//! flaky-local endpoint (helper peers, backend loaders).

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Three-state health gate.
///
/// - `closed` → `open` when consecutive failures reach `failure_threshold`.
/// - `open` → `half_open` lazily, the next time state is *read*, once
///   `reset_timeout` has elapsed since the last failure.
/// - `half_open` → `open` on any single failure.
/// - Any state → `closed` on success.
///
/// Failures recorded by background health probes must never call
/// `record_failure` — only real request failures trip the breaker; probes
/// call [`CircuitBreaker::record_success`] on success and simply log on
/// failure (see `HelperFabric`).
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Evaluate (and lazily transition) the current state, then report
    /// whether a request should be allowed through. `open` blocks; `closed`
    /// and `half_open` allow.
    pub fn allows_request(&self) -> bool {
        self.current_state() != CircuitState::Open
    }

    /// Returns the current state after applying any lazy `open` →
    /// `half_open` transition that is now due.
    pub fn current_state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure {
                if last_failure.elapsed() >= self.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                }
            }
        }
        inner.state
    }

    /// Record a successful call: resets the failure counter and closes the
    /// circuit from any state.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    /// Record a failed call. A failure while `half_open` re-opens the
    /// circuit immediately regardless of `failure_threshold`.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.last_failure = Some(Instant::now());
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::HalfOpen => inner.state = CircuitState::Open,
            CircuitState::Closed | CircuitState::Open => {
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                }
            }
        }
    }

    /// Manually force the circuit back to `closed`.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allows_request());
        breaker.record_failure();
        assert!(!breaker.allows_request());
    }

    #[test]
    fn half_open_single_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        assert!(!breaker.allows_request());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[test]
    fn success_closes_from_any_state() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[test]
    fn record_success_on_closed_circuit_is_a_no_op() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }
}
