//! Console capture over the `log` facade.
//!
//! [`CaptureLogger`] wraps the host's own logger. Every record goes to the host
//! logger first, unchanged; while capture is active the record is also stored
//! as a [`LogEntry`]. Stopping the capture leaves the wrapper in place as a
//! pure pass-through, since `log` cannot swap the global logger back.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::telemetry::{
    cap_text, now_ms, snapshot_args, CapturedArg, ConsoleLevel, LogEntry,
};
use relay_core::RingLog;

/// Log targets with this prefix belong to the SDK and are never captured.
pub const SDK_TARGET_PREFIX: &str = "relay_";

struct Shared {
    active: AtomicBool,
    log: Mutex<RingLog<LogEntry>>,
}

/// Bounded capture of host log output.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct ConsoleCapture {
    shared: Arc<Shared>,
}

impl ConsoleCapture {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                log: Mutex::new(RingLog::new(capacity)),
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

    /// Wrap `inner` so its records are also captured.
    pub fn logger(&self, inner: Box<dyn log::Log>) -> CaptureLogger {
        CaptureLogger {
            inner,
            capture: self.clone(),
        }
    }

    /// Register the wrapper as the global logger.
    ///
    /// Returns `false` when a global logger is already set; capture then only
    /// sees entries recorded through [`ConsoleCapture::capture`].
    pub fn install(&self, inner: Box<dyn log::Log>, max_level: log::LevelFilter) -> bool {
        match log::set_boxed_logger(Box::new(self.logger(inner))) {
            Ok(()) => {
                log::set_max_level(max_level);
                true
            }
            Err(_) => false,
        }
    }

    /// Record a structured entry directly. Ignored while inactive.
    pub fn capture(
        &self,
        level: ConsoleLevel,
        message: impl Into<String>,
        args: impl IntoIterator<Item = CapturedArg>,
    ) {
        if !self.is_active() {
            return;
        }

        let stack = (level == ConsoleLevel::Error)
            .then(capture_backtrace)
            .flatten();

        self.append(LogEntry {
            level,
            message: cap_text(message.into()),
            args_snapshot: snapshot_args(args),
            timestamp_ms: now_ms(),
            stack,
        });
    }

    pub fn get_entries(&self) -> Vec<LogEntry> {
        self.lock().entries()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Entries dropped by the capacity bound.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted()
    }

    fn record(&self, record: &log::Record<'_>) {
        if !self.is_active() || record.target().starts_with(SDK_TARGET_PREFIX) {
            return;
        }

        let message = record.args().to_string();
        let mut args = vec![CapturedArg::text(record.target())];
        if let (Some(file), Some(line)) = (record.file(), record.line()) {
            args.push(CapturedArg::text(format!("{file}:{line}")));
        }

        self.capture(record.level().into(), message, args);
    }

    fn append(&self, entry: LogEntry) {
        self.lock().append(entry);
    }

    fn lock(&self) -> MutexGuard<'_, RingLog<LogEntry>> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `log::Log` wrapper installed in front of the host's logger.
pub struct CaptureLogger {
    inner: Box<dyn log::Log>,
    capture: ConsoleCapture,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        self.inner.enabled(metadata) || self.capture.is_active()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.inner.enabled(record.metadata()) {
            self.inner.log(record);
        }
        self.capture.record(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Backtrace text, only when `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE` enable it.
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
    use log::Log;
    use relay_core::telemetry::{SERIALIZE_BUDGET_CHARS, TRUNCATED_MARKER};
    use serde_json::json;

    #[derive(Default, Clone)]
    struct Collector {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl log::Log for Collector {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::Level::Info
        }

        fn log(&self, record: &log::Record<'_>) {
            self.lines.lock().unwrap().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    fn emit(logger: &CaptureLogger, level: log::Level, target: &str, message: &str) {
        logger.log(
            &log::Record::builder()
                .level(level)
                .target(target)
                .args(format_args!("{message}"))
                .build(),
        );
    }

    #[test]
    fn test_forwards_and_captures_while_active() {
        let collector = Collector::default();
        let capture = ConsoleCapture::new(10);
        let logger = capture.logger(Box::new(collector.clone()));

        emit(&logger, log::Level::Info, "app", "before start");
        capture.start();
        emit(&logger, log::Level::Info, "app", "during");
        capture.stop();
        emit(&logger, log::Level::Info, "app", "after stop");

        assert_eq!(
            *collector.lines.lock().unwrap(),
            vec!["before start", "during", "after stop"]
        );
        let entries = capture.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "during");
        assert_eq!(entries[0].level, ConsoleLevel::Info);
        assert_eq!(entries[0].args_snapshot[0], json!("app"));
    }

    #[test]
    fn test_long_lines_are_stored_once_and_capped() {
        let capture = ConsoleCapture::new(10);
        let logger = capture.logger(Box::new(Collector::default()));
        capture.start();

        let line = "y".repeat(SERIALIZE_BUDGET_CHARS * 3);
        emit(&logger, log::Level::Warn, "checkout", &line);

        let entry = &capture.get_entries()[0];
        assert!(entry.message.contains(TRUNCATED_MARKER));
        assert!(entry.message.chars().count() < SERIALIZE_BUDGET_CHARS + 64);
        assert!(entry
            .args_snapshot
            .iter()
            .all(|arg| arg.as_str().map_or(true, |s| s.len() < 100)));
    }

    #[test]
    fn test_captures_levels_the_host_filters_out() {
        let collector = Collector::default();
        let capture = ConsoleCapture::new(10);
        let logger = capture.logger(Box::new(collector.clone()));
        capture.start();

        emit(&logger, log::Level::Debug, "app", "debug detail");

        assert!(collector.lines.lock().unwrap().is_empty());
        assert_eq!(capture.get_entries()[0].level, ConsoleLevel::Debug);
    }

    #[test]
    fn test_skips_sdk_targets() {
        let capture = ConsoleCapture::new(10);
        let logger = capture.logger(Box::new(Collector::default()));
        capture.start();

        emit(&logger, log::Level::Warn, "relay_sdk::upload", "chunk dropped");
        emit(&logger, log::Level::Warn, "checkout", "slow");

        let entries = capture.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "slow");
    }

    #[test]
    fn test_structured_capture_caps_args() {
        let capture = ConsoleCapture::new(10);
        capture.start();
        capture.capture(
            ConsoleLevel::Warn,
            "cart state",
            (0..8).map(|i| CapturedArg::value(&json!({ "line": i }))),
        );

        let entry = &capture.get_entries()[0];
        assert_eq!(entry.args_snapshot.len(), 5);
        assert_eq!(entry.args_snapshot[4], json!({ "line": 4 }));
    }

    #[test]
    fn test_start_stop_idempotent_and_clear() {
        let capture = ConsoleCapture::new(2);
        capture.start();
        capture.start();
        for i in 0..3 {
            capture.capture(ConsoleLevel::Info, format!("line {i}"), Vec::new());
        }
        assert_eq!(capture.get_entries().len(), 2);
        assert_eq!(capture.evicted(), 1);

        capture.stop();
        capture.stop();
        capture.capture(ConsoleLevel::Info, "ignored", Vec::new());
        assert_eq!(capture.get_entries().len(), 2);

        capture.clear();
        assert!(capture.get_entries().is_empty());
    }
}
