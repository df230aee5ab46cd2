//! Uncaught failure capture.
//!
//! Two listeners feed one deduplicated [`RingLog`]:
//!
//! - the process panic hook, chained in front of whatever hook was installed
//!   before [`ErrorCapture::start`] and restored by [`ErrorCapture::stop`]
//! - the rejection listener, fed through [`RejectionReporter`] handles for
//!   failures nobody handled (a task's `Err`, a dropped error in a callback)
//!
//! Repeats of the same failure (same message, file and line) bump `count` on
//! the existing entry instead of adding a new one.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::task::JoinHandle;

use relay_core::telemetry::{now_ms, CapturedArg, ErrorEntry};
use relay_core::RingLog;

/// `type` of entries recorded by the panic hook.
pub const PANIC_TYPE: &str = "panic";
/// `type` of entries recorded through the rejection listener.
pub const REJECTION_TYPE: &str = "unhandledrejection";

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

struct Shared {
    log: Mutex<RingLog<ErrorEntry>>,
    attached: AtomicBool,
    /// The hook we replaced, present while ours is installed.
    previous_hook: Mutex<Option<Arc<PanicHook>>>,
}

impl Shared {
    fn record(&self, entry: ErrorEntry) {
        let mut log = self
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let repeated = log.update_last_where(
            |existing| existing.same_identity(&entry),
            |existing| existing.count = existing.count.saturating_add(1),
        );
        if !repeated {
            log.append(entry);
        }
    }

    fn record_panic(&self, info: &PanicHookInfo<'_>) {
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        let location = info.location();
        self.record(ErrorEntry {
            message,
            stack: capture_backtrace(),
            error_type: PANIC_TYPE.to_string(),
            filename: location.map(|loc| loc.file().to_string()),
            lineno: location.map(|loc| loc.line()),
            colno: location.map(|loc| loc.column()),
            timestamp_ms: now_ms(),
            count: 1,
        });
    }
}

/// Reason passed to the rejection listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// An error value, already reduced by [`CapturedArg::error`].
    Error { message: String, stack: Option<String> },
    /// A plain message.
    Message(String),
    /// Any other value, stored as its JSON text.
    Value(Value),
}

impl Rejection {
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        match CapturedArg::error(err) {
            CapturedArg::Error {
                name,
                message,
                stack,
            } => Rejection::Error {
                message: format!("{name}: {message}"),
                stack,
            },
            other => Rejection::Message(other.display()),
        }
    }

    fn into_entry(self) -> ErrorEntry {
        let (message, stack) = match self {
            Rejection::Error { message, stack } => (message, stack),
            Rejection::Message(message) => (message, None),
            Rejection::Value(Value::String(message)) => (message, None),
            Rejection::Value(value) => (CapturedArg::value(&value).display(), None),
        };

        ErrorEntry {
            message,
            stack,
            error_type: REJECTION_TYPE.to_string(),
            filename: None,
            lineno: None,
            colno: None,
            timestamp_ms: now_ms(),
            count: 1,
        }
    }
}

/// Cloneable handle hosts use to report unhandled failures.
///
/// Reports are ignored while the capture is stopped, and after it is dropped.
#[derive(Clone)]
pub struct RejectionReporter {
    shared: Weak<Shared>,
}

impl RejectionReporter {
    pub fn report(&self, reason: Rejection) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.attached.load(Ordering::SeqCst) {
            shared.record(reason.into_entry());
        }
    }

    pub fn report_error<E: std::error::Error + ?Sized>(&self, err: &E) {
        self.report(Rejection::from_error(err));
    }

    pub fn report_message(&self, message: impl Into<String>) {
        self.report(Rejection::Message(message.into()));
    }

    pub fn report_value(&self, value: Value) {
        self.report(Rejection::Value(value));
    }
}

/// Capture of panics and unhandled task failures.
///
/// Cheap to clone; clones share the same buffer and listeners.
#[derive(Clone)]
pub struct ErrorCapture {
    shared: Arc<Shared>,
}

impl ErrorCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                log: Mutex::new(RingLog::new(capacity)),
                attached: AtomicBool::new(false),
                previous_hook: Mutex::new(None),
            }),
        }
    }

    /// Install the panic hook and attach the rejection listener.
    ///
    /// Calling it again while started does nothing. The panic hook cannot be
    /// changed from a panicking thread, so only the rejection listener is
    /// attached there.
    pub fn start(&self) {
        self.shared.attached.store(true, Ordering::SeqCst);

        if std::thread::panicking() {
            return;
        }

        let mut slot = self.hook_slot();
        if slot.is_some() {
            return;
        }

        let previous: Arc<PanicHook> = Arc::new(std::panic::take_hook());
        let chained = Arc::clone(&previous);
        let shared = Arc::downgrade(&self.shared);
        std::panic::set_hook(Box::new(move |info| {
            if let Some(shared) = shared.upgrade() {
                shared.record_panic(info);
            }
            chained(info);
        }));

        *slot = Some(previous);
        log::debug!(target: "relay_sdk", "panic hook installed");
    }

    /// Restore the previous panic hook and detach the rejection listener.
    ///
    /// A hook installed by someone else after [`start`](Self::start) is
    /// replaced by the restored one.
    pub fn stop(&self) {
        self.shared.attached.store(false, Ordering::SeqCst);

        if std::thread::panicking() {
            return;
        }

        let mut slot = self.hook_slot();
        let Some(previous) = slot.take() else {
            return;
        };

        // Dropping our hook releases its clone of `previous`.
        drop(std::panic::take_hook());
        match Arc::try_unwrap(previous) {
            Ok(hook) => std::panic::set_hook(hook),
            Err(previous) => std::panic::set_hook(Box::new(move |info| previous(info))),
        }
        log::debug!(target: "relay_sdk", "panic hook restored");
    }

    /// Listeners currently attached: 2 while started, 0 otherwise.
    pub fn listener_count(&self) -> usize {
        let hook = usize::from(self.hook_slot().is_some());
        let rejection = usize::from(self.shared.attached.load(Ordering::SeqCst));
        hook + rejection
    }

    pub fn reporter(&self) -> RejectionReporter {
        RejectionReporter {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Report an unhandled failure. Ignored while stopped.
    pub fn report_rejection(&self, reason: Rejection) {
        self.reporter().report(reason);
    }

    /// Report `handle`'s `Err` result as an unhandled rejection.
    ///
    /// Task panics are left to the panic hook. Must be called inside a tokio
    /// runtime; the returned handle completes once the task has been observed.
    pub fn watch_task<T, E>(&self, handle: JoinHandle<Result<T, E>>) -> JoinHandle<()>
    where
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let reporter = self.reporter();
        tokio::spawn(async move {
            if let Ok(Err(err)) = handle.await {
                reporter.report_error(&err);
            }
        })
    }

    pub fn get_entries(&self) -> Vec<ErrorEntry> {
        self.lock().entries()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, RingLog<ErrorEntry>> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn hook_slot(&self) -> MutexGuard<'_, Option<Arc<PanicHook>>> {
        self.shared
            .previous_hook
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn capture_backtrace() -> Option<String> {
    let backtrace = Backtrace::capture();
    match backtrace.status() {
        BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fmt;

    #[derive(Debug)]
    struct PaymentError;

    impl fmt::Display for PaymentError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "card declined")
        }
    }

    impl std::error::Error for PaymentError {}

    fn attached_capture(capacity: usize) -> ErrorCapture {
        let capture = ErrorCapture::new(capacity);
        // Rejection listener only; the panic hook is covered by the
        // integration tests, which own the process-wide hook.
        capture.shared.attached.store(true, Ordering::SeqCst);
        capture
    }

    #[test]
    fn test_rejections_are_deduplicated() {
        let capture = attached_capture(10);
        let reporter = capture.reporter();

        reporter.report_message("session expired");
        reporter.report_message("session expired");
        reporter.report_message("other");
        reporter.report_message("session expired");

        let entries = capture.get_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "session expired");
        assert_eq!(entries[0].count, 3);
        assert_eq!(entries[0].error_type, REJECTION_TYPE);
        assert_eq!(entries[1].count, 1);
    }

    #[test]
    fn test_rejection_reasons() {
        let capture = attached_capture(10);
        let reporter = capture.reporter();

        reporter.report_error(&PaymentError);
        reporter.report_value(json!({ "code": 42 }));
        reporter.report_value(json!("plain string"));

        let messages: Vec<String> = capture
            .get_entries()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(
            messages,
            vec!["PaymentError: card declined", r#"{"code":42}"#, "plain string"]
        );
    }

    #[test]
    fn test_detached_reporter_ignores_reports() {
        let capture = ErrorCapture::new(10);
        let reporter = capture.reporter();
        reporter.report_message("not attached");
        assert!(capture.get_entries().is_empty());

        drop(capture);
        reporter.report_message("capture gone");
    }

    #[test]
    fn test_listener_count_without_hook() {
        let capture = ErrorCapture::new(10);
        assert_eq!(capture.listener_count(), 0);
        capture.stop();
        assert_eq!(capture.listener_count(), 0);
    }

    #[test]
    fn test_dedupe_survives_capacity() {
        let capture = attached_capture(2);
        let reporter = capture.reporter();
        for reason in ["a", "b", "c", "c"] {
            reporter.report_message(reason);
        }

        let entries = capture.get_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "b");
        assert_eq!(entries[1].message, "c");
        assert_eq!(entries[1].count, 2);
    }

    #[tokio::test]
    async fn test_watch_task_reports_err() {
        let capture = attached_capture(10);

        let failing = tokio::spawn(async { Err::<(), _>(PaymentError) });
        capture.watch_task(failing).await.unwrap();

        let succeeding = tokio::spawn(async { Ok::<_, PaymentError>(7) });
        capture.watch_task(succeeding).await.unwrap();

        let entries = capture.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "PaymentError: card declined");
    }
}
