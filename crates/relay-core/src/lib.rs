//! Relay Core - bounded buffers and data types for the Relay capture SDK.
//!
//! ## Module Organization
//!
//! - [`ring_log`] - capacity-bounded FIFO log shared by every capture
//! - [`telemetry`] - captured entry types, argument snapshots, replay chunks
//! - [`http`] - retry policy and circuit breaker for backend calls
//! - [`error`] - the error hierarchy used across the SDK
//!
//! Nothing in this crate performs I/O; the `relay-sdk` crate wires these
//! pieces to the host application and the ingest backend.

pub mod error;
pub use error::{RecorderError, RelayError, RelayResult, TransportError, UploadError};

/// HTTP resilience (retry with backoff, circuit breaker)
pub mod http;

/// Capacity-bounded log with FIFO eviction
pub mod ring_log;
pub use ring_log::RingLog;

/// Captured entries, argument snapshots, replay events and chunks
pub mod telemetry;
