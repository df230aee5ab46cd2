//! Unified error types for the Relay capture pipeline.
//!
//! Capture itself never fails outward: serialization and interception problems
//! are absorbed where they happen. The errors here cover what is left, which is
//! talking to the ingest backend and loading the replay recorder.
//!
//! # Error Hierarchy
//!
//! ```text
//! RelayError
//! ├── Transport(TransportError)  -- a single HTTP call to the backend failed
//! ├── Upload(UploadError)        -- a multi-step upload failed at a named step
//! ├── Recorder(RecorderError)    -- the replay recorder could not be loaded/started
//! ├── Config(String)             -- invalid SDK configuration
//! ├── NotStarted(String)         -- operation requires a started client/session
//! ├── QueueFull(usize)           -- the background upload queue is at capacity
//! ├── Task(String)               -- a background task panicked or was cancelled
//! └── Serialization(String)      -- JSON encoding/decoding errors
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::http::RetryableError;

/// The canonical error type for the Relay SDK public API.
#[derive(Error, Debug)]
pub enum RelayError {
    /// A backend call failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// An upload failed part way through the protocol
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// The session-replay recorder failed
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation needs a running client or replay session
    #[error("Not started: {0}")]
    NotStarted(String),

    /// The background upload queue cannot take another item
    #[error("Upload queue full ({0} pending)")]
    QueueFull(usize),

    /// A background task did not run to completion
    #[error("Background task failed: {0}")]
    Task(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure of a single HTTP exchange with the ingest backend or a signed URL.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection-level failure (DNS, refused, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The backend asked us to slow down.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// The call exceeded the SDK's bounded timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The response body did not have the expected shape.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Too many recent failures; the call was not attempted.
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),
}

impl RetryableError for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::RateLimited { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Api { status, .. } => matches!(status, 502..=504),
            TransportError::Parse(_) => false,
            TransportError::CircuitOpen(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Which half of the two-step signed-URL protocol failed.
///
/// The metadata call and the binary write are not atomic, so a successful
/// metadata call followed by a failed write is reported as `BinaryWrite`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    /// The metadata call (initiate upload / send chunk) failed.
    #[error("{step} failed: {source}")]
    Metadata {
        step: &'static str,
        #[source]
        source: TransportError,
    },

    /// The signed URL was issued but writing the bytes to it failed.
    #[error("binary write for {target} failed: {source}")]
    BinaryWrite {
        target: String,
        #[source]
        source: TransportError,
    },

    /// Bytes were written but the backend refused to finalize the media.
    #[error("completing media {media_id} failed: {source}")]
    Complete {
        media_id: String,
        #[source]
        source: TransportError,
    },

    /// The payload could not be encoded for upload.
    #[error("encoding {target} failed: {message}")]
    Encode { target: String, message: String },
}

impl UploadError {
    /// The transport failure underneath, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            UploadError::Metadata { source, .. }
            | UploadError::BinaryWrite { source, .. }
            | UploadError::Complete { source, .. } => Some(source),
            UploadError::Encode { .. } => None,
        }
    }
}

/// Errors loading or driving the session-replay recorder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    /// The recorder could not be loaded.
    #[error("failed to load recorder: {0}")]
    Load(String),

    /// The recorder refused to open a subscription.
    #[error("failed to start recording: {0}")]
    Start(String),
}

/// Result type alias for the Relay SDK.
pub type RelayResult<T> = Result<T, RelayError>;

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl RelayError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        RelayError::Config(msg.into())
    }

    /// Create a "not started" error.
    pub fn not_started(msg: impl Into<String>) -> Self {
        RelayError::NotStarted(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        let err = RelayError::config("endpoint is empty");
        assert_eq!(err.to_string(), "Configuration error: endpoint is empty");
    }

    #[test]
    fn test_upload_error_display_names_step() {
        let err = UploadError::Metadata {
            step: "initiate_upload",
            source: TransportError::Timeout { timeout_ms: 30000 },
        };
        assert_eq!(
            err.to_string(),
            "initiate_upload failed: Request timed out after 30000ms"
        );
    }

    #[test]
    fn test_binary_write_exposes_transport() {
        let err = UploadError::BinaryWrite {
            target: "replay chunk 3".to_string(),
            source: TransportError::Api {
                status: 403,
                message: "signature expired".to_string(),
            },
        };
        assert!(matches!(
            err.transport(),
            Some(TransportError::Api { status: 403, .. })
        ));

        let relay: RelayError = err.into();
        assert!(matches!(relay, RelayError::Upload(UploadError::BinaryWrite { .. })));
    }

    #[test]
    fn test_transport_retryability() {
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(TransportError::Timeout { timeout_ms: 1 }.is_retryable());
        assert!(TransportError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!TransportError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!TransportError::CircuitOpen("open".into()).is_retryable());
        assert_eq!(
            TransportError::RateLimited { retry_after_secs: 7 }.retry_after(),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let result: Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let err: RelayError = result.unwrap_err().into();
        assert!(matches!(err, RelayError::Serialization(_)));
    }
}
