//! Entry types stored by the console, network and error captures.

use serde::{Deserialize, Serialize};

/// Severity of a captured log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleLevel::Trace => "trace",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

impl From<log::Level> for ConsoleLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => ConsoleLevel::Error,
            log::Level::Warn => ConsoleLevel::Warn,
            log::Level::Info => ConsoleLevel::Info,
            log::Level::Debug => ConsoleLevel::Debug,
            log::Level::Trace => ConsoleLevel::Trace,
        }
    }
}

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: ConsoleLevel,
    pub message: String,
    /// At most five size-capped argument snapshots.
    pub args_snapshot: Vec<serde_json::Value>,
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// One observed outbound HTTP call.
///
/// Created pending (no status, no duration) when the call starts and resolved
/// exactly once when it completes, fails, or is abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    /// Per-capture sequence number used to resolve the pending entry.
    pub id: u64,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub request_size_bytes: Option<u64>,
    pub response_size_bytes: Option<u64>,
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

impl NetworkEntry {
    pub fn pending(
        id: u64,
        method: impl Into<String>,
        url: impl Into<String>,
        request_size_bytes: Option<u64>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            id,
            method: method.into().to_uppercase(),
            url: url.into(),
            status: None,
            duration_ms: None,
            request_size_bytes,
            response_size_bytes: None,
            error: None,
            timestamp_ms,
        }
    }

    /// Still waiting for the call to finish.
    pub fn is_pending(&self) -> bool {
        self.status.is_none() && self.error.is_none()
    }
}

/// Coarse classification of a failed network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorCategory {
    Timeout,
    Aborted,
    Network,
    Other,
}

impl NetworkErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorCategory::Timeout => "Timeout",
            NetworkErrorCategory::Aborted => "Aborted",
            NetworkErrorCategory::Network => "Network Error",
            NetworkErrorCategory::Other => "Error",
        }
    }

    /// Classify an error message from an HTTP client.
    pub fn from_error(error: &str) -> Self {
        let lower = error.to_lowercase();
        if lower.contains("timed out") || lower.contains("timeout") {
            NetworkErrorCategory::Timeout
        } else if lower.contains("abort") || lower.contains("cancel") {
            NetworkErrorCategory::Aborted
        } else if lower.contains("dns")
            || lower.contains("connect")
            || lower.contains("refused")
            || lower.contains("reset")
            || lower.contains("network")
            || lower.contains("unreachable")
            || lower.contains("broken pipe")
        {
            NetworkErrorCategory::Network
        } else {
            NetworkErrorCategory::Other
        }
    }

    /// The string stored in [`NetworkEntry::error`]: the category name, or the
    /// original message when it fits no category.
    pub fn describe(error: &str) -> String {
        match Self::from_error(error) {
            NetworkErrorCategory::Other if !error.trim().is_empty() => error.to_string(),
            category => category.as_str().to_string(),
        }
    }
}

/// One distinct uncaught failure, with a repeat counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(rename = "type")]
    pub error_type: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub colno: Option<u32>,
    /// Time of the first occurrence.
    pub timestamp_ms: u64,
    pub count: u32,
}

impl ErrorEntry {
    /// Same failure as `other`: message, file and line all match.
    pub fn same_identity(&self, other: &ErrorEntry) -> bool {
        self.message == other.message
            && self.filename == other.filename
            && self.lineno == other.lineno
    }
}
