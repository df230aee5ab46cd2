//! Circuit breaker guarding background uploads.
//!
//! ```text
//! CLOSED ──[threshold consecutive failures / 429]──► OPEN
//!   ▲                                                 │
//!   │                                          [open_duration]
//!   │                                                 ▼
//!   └──────────────[probe succeeds]─────────── HALF-OPEN ──[probe fails]──► OPEN
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before letting a probe through.
    pub open_duration_ms: u64,
    /// Probes allowed while half-open.
    pub half_open_max: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_ms: 30_000,
            half_open_max: 1,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Blocking calls until `until`.
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    probes_in_flight: u32,
}

/// Thread-safe circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probes_in_flight: 0,
            }),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitConfig::default())
    }

    /// Whether a call may go out now. Moves OPEN to HALF-OPEN once the open
    /// window has elapsed and hands out at most `half_open_max` probes.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open { until } => {
                if Instant::now() < until {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probes_in_flight = 1;
                self.config.half_open_max >= 1
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_max {
                    inner.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.probes_in_flight = 0;
        inner.state = CircuitState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open { .. } => {}
        }
    }

    /// A 429 opens the circuit immediately.
    pub fn record_rate_limited(&self) {
        let mut inner = self.lock();
        self.open(&mut inner);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), CircuitState::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state(), CircuitState::Closed)
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.probes_in_flight = 0;
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open {
            until: Instant::now() + Duration::from_millis(self.config.open_duration_ms),
        };
        inner.probes_in_flight = 0;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The state is plain data; a poisoned lock still holds a valid value.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn breaker(threshold: u32, open_ms: u64, probes: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig {
            failure_threshold: threshold,
            open_duration_ms: open_ms,
            half_open_max: probes,
        })
    }

    #[test]
    fn test_starts_closed() {
        let circuit = CircuitBreaker::with_defaults();
        assert!(circuit.is_closed());
        assert!(circuit.can_execute());
    }

    #[test]
    fn test_opens_after_threshold() {
        let circuit = breaker(3, 30_000, 1);

        circuit.record_failure();
        circuit.record_failure();
        assert!(circuit.is_closed());
        assert_eq!(circuit.failure_count(), 2);

        circuit.record_failure();
        assert!(circuit.is_open());
        assert!(!circuit.can_execute());
    }

    #[test]
    fn test_success_clears_failures() {
        let circuit = breaker(3, 30_000, 1);
        circuit.record_failure();
        circuit.record_failure();
        circuit.record_success();
        assert_eq!(circuit.failure_count(), 0);
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_rate_limit_opens_immediately() {
        let circuit = CircuitBreaker::with_defaults();
        circuit.record_rate_limited();
        assert!(circuit.is_open());
    }

    #[test]
    fn test_half_open_probe_then_close() {
        let circuit = breaker(1, 10, 1);
        circuit.record_failure();
        assert!(!circuit.can_execute());

        thread::sleep(Duration::from_millis(20));
        assert!(circuit.can_execute());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(!circuit.can_execute(), "only one probe while half-open");

        circuit.record_success();
        assert!(circuit.is_closed());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let circuit = breaker(1, 10, 1);
        circuit.record_failure();
        thread::sleep(Duration::from_millis(20));
        assert!(circuit.can_execute());

        circuit.record_failure();
        assert!(circuit.is_open());
    }

    #[test]
    fn test_reset() {
        let circuit = CircuitBreaker::with_defaults();
        circuit.record_rate_limited();
        circuit.reset();
        assert!(circuit.is_closed());
        assert!(circuit.can_execute());
    }
}
