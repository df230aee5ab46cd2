//! HTTP resilience for calls the SDK makes to the ingest backend.
//!
//! - [`RetryPolicy`] / [`with_retry`]: exponential backoff with jitter for the
//!   idempotent metadata calls a user action is waiting on.
//! - [`CircuitBreaker`]: stops background replay uploads from hammering a
//!   backend that is already failing.
//!
//! ```rust,ignore
//! use relay_core::http::{CircuitBreaker, CircuitConfig};
//!
//! let circuit = CircuitBreaker::new(CircuitConfig::default());
//! if circuit.can_execute() {
//!     match upload() {
//!         Ok(_) => circuit.record_success(),
//!         Err(_) => circuit.record_failure(),
//!     }
//! }
//! ```

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitState};
pub use retry::{with_retry, RetryPolicy, RetryResult, RetryableError};
