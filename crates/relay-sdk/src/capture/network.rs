//! Network capture for outbound HTTP calls.
//!
//! Two ways in, both recording the same [`NetworkEntry`] shape:
//!
//! - [`CaptureMiddleware`] for blocking `ureq` agents (callback style)
//! - [`NetworkCapture::instrument`] for any future resolving to a response
//!
//! Neither changes what the host's call returns. Calls to the SDK's own
//! telemetry endpoints are never recorded (see [`SelfExclusion`]).

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use url::Url;

use relay_core::telemetry::{now_ms, NetworkEntry, NetworkErrorCategory};
use relay_core::RingLog;

use crate::config::SelfExclusionConfig;

const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Denylist of URLs that belong to the SDK itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfExclusion {
    host_suffixes: Vec<String>,
    endpoint_host: Option<String>,
    local_paths: Vec<String>,
}

impl SelfExclusion {
    /// Build the denylist from config plus the host of the configured endpoint.
    pub fn new(config: &SelfExclusionConfig, endpoint: &str) -> Self {
        let endpoint_host = Url::parse(endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase));

        Self {
            host_suffixes: config
                .host_suffixes
                .iter()
                .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            endpoint_host,
            local_paths: config.local_paths.clone(),
        }
    }

    /// Whether a call to `url` must not be recorded.
    ///
    /// Unparseable URLs are not excluded.
    pub fn is_excluded(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };

        if self.endpoint_host.as_deref() == Some(host.as_str()) {
            return true;
        }

        let telemetry_host = self
            .host_suffixes
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")));
        if telemetry_host {
            return true;
        }

        LOOPBACK_HOSTS.contains(&host.as_str())
            && self
                .local_paths
                .iter()
                .any(|path| parsed.path().contains(path.as_str()))
    }
}

impl Default for SelfExclusion {
    fn default() -> Self {
        Self::new(&SelfExclusionConfig::default(), crate::config::DEFAULT_ENDPOINT)
    }
}

struct Shared {
    active: AtomicBool,
    next_id: AtomicU64,
    log: Mutex<RingLog<NetworkEntry>>,
    exclusion: SelfExclusion,
}

/// Bounded capture of outbound HTTP calls.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct NetworkCapture {
    shared: Arc<Shared>,
}

impl NetworkCapture {
    pub fn new(capacity: usize, exclusion: SelfExclusion) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                log: Mutex::new(RingLog::new(capacity)),
                exclusion,
            }),
        }
    }

    pub fn start(&self) {
        self.shared.active.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn exclusion(&self) -> &SelfExclusion {
        &self.shared.exclusion
    }

    /// Record the start of a call.
    ///
    /// Returns `None` (nothing recorded) while inactive or for excluded URLs.
    pub fn begin(&self, method: &str, url: &str, request_size: Option<u64>) -> Option<PendingCall> {
        if !self.is_active() || self.shared.exclusion.is_excluded(url) {
            return None;
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .append(NetworkEntry::pending(id, method, url, request_size, now_ms()));

        Some(PendingCall {
            capture: self.clone(),
            id,
            started: Instant::now(),
            resolved: false,
        })
    }

    /// Await `call`, recording it, and hand back its result untouched.
    ///
    /// Dropping the returned future before it completes records the call as
    /// aborted.
    pub async fn instrument<F, R, E>(
        &self,
        method: &str,
        url: &str,
        request_size: Option<u64>,
        call: F,
    ) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        R: ObservedResponse,
        E: Display,
    {
        let pending = self.begin(method, url, request_size);
        let result = call.await;

        if let Some(pending) = pending {
            match &result {
                Ok(response) => pending.complete(response.status(), response.content_length()),
                Err(err) => pending.fail(&err.to_string()),
            }
        }
        result
    }

    /// Middleware for the host's `ureq::AgentBuilder`.
    pub fn middleware(&self) -> CaptureMiddleware {
        CaptureMiddleware {
            capture: self.clone(),
        }
    }

    pub fn get_entries(&self) -> Vec<NetworkEntry> {
        self.lock().entries()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn resolve(&self, id: u64, update: impl FnOnce(&mut NetworkEntry)) {
        // The entry may already have been evicted; nothing to do then.
        self.lock().update_last_where(|e| e.id == id, update);
    }

    fn lock(&self) -> MutexGuard<'_, RingLog<NetworkEntry>> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An in-flight call. Resolve it exactly once with [`complete`](Self::complete)
/// or [`fail`](Self::fail); dropping it unresolved records `Aborted`.
pub struct PendingCall {
    capture: NetworkCapture,
    id: u64,
    started: Instant,
    resolved: bool,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The call produced a response, whatever its status.
    pub fn complete(mut self, status: u16, response_size: Option<u64>) {
        self.resolved = true;
        let duration_ms = self.elapsed_ms();
        self.capture.resolve(self.id, |entry| {
            entry.status = Some(status);
            entry.duration_ms = Some(duration_ms);
            entry.response_size_bytes = response_size;
        });
    }

    /// The call failed before producing a response.
    pub fn fail(mut self, error: &str) {
        self.resolved = true;
        self.record_error(NetworkErrorCategory::describe(error));
    }

    fn record_error(&self, error: String) {
        let duration_ms = self.elapsed_ms();
        self.capture.resolve(self.id, |entry| {
            entry.duration_ms = Some(duration_ms);
            entry.error = Some(error);
        });
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.resolved {
            self.record_error(NetworkErrorCategory::Aborted.as_str().to_string());
        }
    }
}

/// What network capture reads from a completed response.
pub trait ObservedResponse {
    fn status(&self) -> u16;

    /// Body size from the `Content-Length` header, when present.
    fn content_length(&self) -> Option<u64>;
}

impl ObservedResponse for ureq::Response {
    fn status(&self) -> u16 {
        ureq::Response::status(self)
    }

    fn content_length(&self) -> Option<u64> {
        parse_content_length(self.header("Content-Length"))
    }
}

/// `ureq` middleware that records every call made through the agent.
///
/// HTTP error statuses (`ureq::Error::Status`) are recorded as completed calls
/// with that status; transport errors are recorded as failures. The result is
/// always returned unchanged.
#[derive(Clone)]
pub struct CaptureMiddleware {
    capture: NetworkCapture,
}

impl ureq::Middleware for CaptureMiddleware {
    fn handle(
        &self,
        request: ureq::Request,
        next: ureq::MiddlewareNext<'_>,
    ) -> Result<ureq::Response, ureq::Error> {
        let pending = self.capture.begin(
            request.method(),
            request.url(),
            parse_content_length(request.header("Content-Length")),
        );

        let result = next.handle(request);

        if let Some(pending) = pending {
            match &result {
                Ok(response) => pending.complete(response.status(), response.content_length()),
                Err(ureq::Error::Status(status, response)) => {
                    pending.complete(*status, response.content_length())
                }
                Err(ureq::Error::Transport(transport)) => pending.fail(&transport.to_string()),
            }
        }
        result
    }
}

fn parse_content_length(header: Option<&str>) -> Option<u64> {
    header.and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeResponse {
        status: u16,
        length: Option<u64>,
    }

    impl ObservedResponse for FakeResponse {
        fn status(&self) -> u16 {
            self.status
        }

        fn content_length(&self) -> Option<u64> {
            self.length
        }
    }

    fn active_capture() -> NetworkCapture {
        let capture = NetworkCapture::new(10, SelfExclusion::default());
        capture.start();
        capture
    }

    #[test]
    fn test_self_exclusion() {
        let exclusion = SelfExclusion::new(
            &SelfExclusionConfig::default(),
            "https://ingest.acme-feedback.io",
        );

        assert!(exclusion.is_excluded("https://eu-west.api.relay.dev/trpc/ingest.track"));
        assert!(exclusion.is_excluded("https://relay.dev/"));
        assert!(exclusion.is_excluded("https://ingest.acme-feedback.io/trpc/replay.chunk"));
        assert!(exclusion.is_excluded("http://localhost:3000/trpc/feedback.submit"));
        assert!(exclusion.is_excluded("http://127.0.0.1:3000/api/trpc/logs.store"));
        assert!(exclusion.is_excluded("http://[::1]:3000/trpc/x"));

        assert!(!exclusion.is_excluded("https://api.example.com/orders"));
        assert!(!exclusion.is_excluded("https://notrelay.dev/"));
        assert!(!exclusion.is_excluded("http://localhost:3000/api/orders"));
        assert!(!exclusion.is_excluded("/relative/path"));
    }

    #[test]
    fn test_complete_resolves_pending_entry() {
        let capture = active_capture();
        let pending = capture
            .begin("get", "https://api.example.com/orders", None)
            .unwrap();

        let entries = capture.get_entries();
        assert!(entries[0].is_pending());
        assert_eq!(entries[0].method, "GET");

        pending.complete(200, Some(512));
        let entry = &capture.get_entries()[0];
        assert_eq!(entry.status, Some(200));
        assert_eq!(entry.response_size_bytes, Some(512));
        assert!(entry.duration_ms.is_some());
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_fail_and_drop() {
        let capture = active_capture();

        capture
            .begin("POST", "https://api.example.com/pay", Some(20))
            .unwrap()
            .fail("Connection refused (os error 111)");
        drop(capture.begin("GET", "https://api.example.com/slow", None));

        let entries = capture.get_entries();
        assert_eq!(entries[0].error.as_deref(), Some("Network Error"));
        assert_eq!(entries[0].status, None);
        assert_eq!(entries[0].request_size_bytes, Some(20));
        assert_eq!(entries[1].error.as_deref(), Some("Aborted"));
        assert!(entries.iter().all(|e| e.duration_ms.is_some()));
    }

    #[test]
    fn test_inactive_and_excluded_record_nothing() {
        let capture = NetworkCapture::new(10, SelfExclusion::default());
        assert!(capture.begin("GET", "https://api.example.com/", None).is_none());

        capture.start();
        assert!(capture
            .begin("POST", "https://api.relay.dev/trpc/replay.chunk", None)
            .is_none());
        assert!(capture.get_entries().is_empty());
    }

    #[test]
    fn test_resolving_after_eviction_is_harmless() {
        let capture = NetworkCapture::new(1, SelfExclusion::default());
        capture.start();
        let first = capture.begin("GET", "https://a.example.com/", None).unwrap();
        let second = capture.begin("GET", "https://b.example.com/", None).unwrap();

        first.complete(200, None);
        second.complete(201, None);

        let entries = capture.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, Some(201));
    }

    #[tokio::test]
    async fn test_instrument_returns_result_untouched() {
        let capture = active_capture();

        let ok: Result<FakeResponse, String> = capture
            .instrument("GET", "https://api.example.com/orders", None, async {
                Ok(FakeResponse {
                    status: 404,
                    length: Some(9),
                })
            })
            .await;
        assert_eq!(ok.map(|r| r.status).ok(), Some(404));

        let err: Result<FakeResponse, String> = capture
            .instrument("GET", "https://api.example.com/orders", None, async {
                Err("operation timed out".to_string())
            })
            .await;
        assert_eq!(err.err().as_deref(), Some("operation timed out"));

        let entries = capture.get_entries();
        assert_eq!(entries[0].status, Some(404));
        assert_eq!(entries[0].response_size_bytes, Some(9));
        assert_eq!(entries[1].error.as_deref(), Some("Timeout"));
    }

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length(Some(" 128 ")), Some(128));
        assert_eq!(parse_content_length(Some("chunked")), None);
        assert_eq!(parse_content_length(None), None);
    }
}
