//! SDK configuration.
//!
//! Every section has working defaults, so a host only has to supply the API
//! key. Configs can be built in code with the `with_*` builders, read from the
//! environment with [`SdkConfig::from_env`], or deserialized from JSON.

use serde::{Deserialize, Serialize};

use relay_core::http::{CircuitConfig, RetryPolicy};
use relay_core::ring_log::{
    DEFAULT_CONSOLE_CAPACITY, DEFAULT_ERROR_CAPACITY, DEFAULT_NETWORK_CAPACITY,
};
use relay_core::{RelayError, RelayResult};

/// Default ingest endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.relay.dev";

/// Default bound on every SDK outbound call (30 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default replay flush interval (5 seconds).
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;

/// Default replay trip-wire: pending events that force a flush.
pub const DEFAULT_MAX_EVENTS_PER_CHUNK: usize = 5_000;

/// Top-level SDK configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Ingest API base URL (e.g., "https://api.relay.dev")
    pub endpoint: String,
    /// Project API key, sent as a bearer token
    pub api_key: String,
    /// Timeout for every SDK request, in milliseconds
    pub timeout_ms: u64,
    pub capture: CaptureToggles,
    pub capacities: Capacities,
    pub replay: ReplayConfig,
    pub self_exclusion: SelfExclusionConfig,
    /// Retry policy for user-triggered metadata calls
    pub retry: RetryPolicy,
    /// Circuit breaker for background replay chunk uploads
    pub chunk_circuit: CircuitConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            capture: CaptureToggles::default(),
            capacities: Capacities::default(),
            replay: ReplayConfig::default(),
            self_exclusion: SelfExclusionConfig::default(),
            retry: RetryPolicy::default(),
            chunk_circuit: CircuitConfig::default(),
        }
    }
}

impl SdkConfig {
    /// Create a config with an endpoint and API key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Create from environment variables.
    ///
    /// Reads:
    /// - `RELAY_API_KEY` - Required API key
    /// - `RELAY_ENDPOINT` - Ingest endpoint (default: https://api.relay.dev)
    pub fn from_env() -> RelayResult<Self> {
        let api_key = std::env::var("RELAY_API_KEY")
            .map_err(|_| RelayError::config("RELAY_API_KEY is not set"))?;
        let endpoint =
            std::env::var("RELAY_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let config = Self::new(endpoint, api_key);
        config.validate()?;
        Ok(config)
    }

    /// Set the request timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Choose which captures run
    pub fn with_capture(mut self, capture: CaptureToggles) -> Self {
        self.capture = capture;
        self
    }

    /// Set ring log capacities
    pub fn with_capacities(mut self, capacities: Capacities) -> Self {
        self.capacities = capacities;
        self
    }

    /// Set session-replay options
    pub fn with_replay(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }

    /// Set the retry policy for metadata calls
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Add a telemetry host suffix that network capture must ignore
    pub fn with_excluded_host(mut self, suffix: impl Into<String>) -> Self {
        self.self_exclusion.host_suffixes.push(suffix.into());
        self
    }

    /// Check the config can be used to talk to the backend.
    pub fn validate(&self) -> RelayResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RelayError::config("api_key is empty"));
        }
        let endpoint = url::Url::parse(&self.endpoint)
            .map_err(|e| RelayError::config(format!("invalid endpoint {}: {}", self.endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(RelayError::config(format!(
                "endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(RelayError::config("timeout_ms must be greater than zero"));
        }
        if self.replay.flush_interval_ms == 0 {
            return Err(RelayError::config(
                "replay.flush_interval_ms must be greater than zero",
            ));
        }
        if self.replay.max_events_per_chunk == 0 {
            return Err(RelayError::config(
                "replay.max_events_per_chunk must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Endpoint without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

/// Which captures `RelayClient::start` turns on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureToggles {
    pub console: bool,
    pub network: bool,
    /// Session replay
    pub dom: bool,
}

impl Default for CaptureToggles {
    fn default() -> Self {
        Self {
            console: true,
            network: true,
            dom: true,
        }
    }
}

/// Ring log capacities per capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacities {
    pub console: usize,
    pub network: usize,
    pub errors: usize,
}

impl Default for Capacities {
    fn default() -> Self {
        Self {
            console: DEFAULT_CONSOLE_CAPACITY,
            network: DEFAULT_NETWORK_CAPACITY,
            errors: DEFAULT_ERROR_CAPACITY,
        }
    }
}

/// Session-replay chunking and recorder options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Flush at least this often while recording
    pub flush_interval_ms: u64,
    /// Flush as soon as this many events are pending
    pub max_events_per_chunk: usize,
    /// Passed through to the recorder untouched
    pub record: RecordOptions,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_events_per_chunk: DEFAULT_MAX_EVENTS_PER_CHUNK,
            record: RecordOptions::default(),
        }
    }
}

impl ReplayConfig {
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    pub fn with_max_events_per_chunk(mut self, max: usize) -> Self {
        self.max_events_per_chunk = max;
        self
    }

    pub fn with_record(mut self, record: RecordOptions) -> Self {
        self.record = record;
        self
    }
}

/// Privacy and sampling options handed to the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordOptions {
    pub mask_all_inputs: bool,
    /// Elements whose text is masked
    pub mask_text_selector: Option<String>,
    /// Elements that are not recorded at all
    pub block_selector: Option<String>,
    pub sampling: SamplingConfig,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            mask_all_inputs: true,
            mask_text_selector: Some("[data-relay-mask]".to_string()),
            block_selector: Some("[data-relay-block]".to_string()),
            sampling: SamplingConfig::default(),
        }
    }
}

/// Minimum interval between two recorded events of the same interaction kind.
///
/// `None` records every event of that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub mousemove_ms: Option<u64>,
    pub scroll_ms: Option<u64>,
    pub input_ms: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            mousemove_ms: Some(50),
            scroll_ms: Some(150),
            input_ms: None,
        }
    }
}

/// URLs network capture must never record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfExclusionConfig {
    /// Hosts equal to or ending in one of these are telemetry hosts
    pub host_suffixes: Vec<String>,
    /// Path fragments that mark local-dev telemetry on loopback hosts
    pub local_paths: Vec<String>,
}

impl Default for SelfExclusionConfig {
    fn default() -> Self {
        Self {
            host_suffixes: vec!["relay.dev".to_string()],
            local_paths: vec!["/trpc/".to_string()],
        }
    }
}
