//! Host telemetry captures.
//!
//! Each capture owns one bounded [`RingLog`](relay_core::RingLog) and can be
//! started and stopped any number of times. Stopping never loses what was
//! already captured; `clear()` does.

pub mod console;
pub mod errors;
pub mod network;

pub use console::{CaptureLogger, ConsoleCapture};
pub use errors::{ErrorCapture, Rejection, RejectionReporter};
pub use network::{CaptureMiddleware, NetworkCapture, ObservedResponse, PendingCall, SelfExclusion};
