//! Recorder plumbing for session replay.
//!
//! A [`Recorder`] turns UI activity into [`ReplayEvent`]s. The SDK loads it
//! lazily through a [`RecorderLoader`] the first time replay starts, then
//! opens one subscription per replay session. [`ChannelRecorder`] is the
//! built-in recorder for hosts that push their own events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::telemetry::ReplayEvent;
use relay_core::RecorderError;

use crate::config::{RecordOptions, SamplingConfig};

/// Produces the recorder on first use. Runs on a blocking thread.
pub type RecorderLoader =
    Arc<dyn Fn() -> Result<Arc<dyn Recorder>, RecorderError> + Send + Sync>;

/// Source of replay events.
pub trait Recorder: Send + Sync {
    /// Open a subscription delivering events to `emit` until the returned
    /// handle is stopped.
    ///
    /// `emit` may be called from any thread, including from inside this call.
    fn record(
        &self,
        options: &RecordOptions,
        emit: EventEmitter,
    ) -> Result<Box<dyn RecordingHandle>, RecorderError>;
}

/// An open recorder subscription.
pub trait RecordingHandle: Send {
    fn stop(self: Box<Self>);
}

/// Callback a recorder delivers events through.
#[derive(Clone)]
pub struct EventEmitter {
    deliver: Arc<dyn Fn(ReplayEvent) + Send + Sync>,
}

impl EventEmitter {
    pub fn new(deliver: impl Fn(ReplayEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: ReplayEvent) {
        (self.deliver)(event)
    }
}

/// Interaction kinds subject to sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionSource {
    MouseMove,
    Scroll,
    Input,
}

impl InteractionSource {
    fn slot(self) -> usize {
        match self {
            InteractionSource::MouseMove => 0,
            InteractionSource::Scroll => 1,
            InteractionSource::Input => 2,
        }
    }

    fn min_interval_ms(self, sampling: &SamplingConfig) -> Option<u64> {
        match self {
            InteractionSource::MouseMove => sampling.mousemove_ms,
            InteractionSource::Scroll => sampling.scroll_ms,
            InteractionSource::Input => sampling.input_ms,
        }
    }
}

struct Subscription {
    id: u64,
    emit: EventEmitter,
    options: RecordOptions,
    last_accepted: [Option<u64>; 3],
}

impl Subscription {
    /// Drop `event` if another of the same kind was accepted too recently.
    fn sample(&mut self, source: InteractionSource, timestamp: u64) -> bool {
        let slot = source.slot();
        if let (Some(interval), Some(last)) = (
            source.min_interval_ms(&self.options.sampling),
            self.last_accepted[slot],
        ) {
            if timestamp < last.saturating_add(interval) {
                return false;
            }
        }
        self.last_accepted[slot] = Some(timestamp);
        true
    }
}

struct FeedInner {
    subscription: Mutex<Option<Subscription>>,
    next_id: AtomicU64,
}

impl FeedInner {
    fn lock(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Recorder fed by the host through a [`ReplayFeed`].
///
/// Holds at most one subscription; opening a new one closes the previous.
#[derive(Clone)]
pub struct ChannelRecorder {
    inner: Arc<FeedInner>,
}

impl ChannelRecorder {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FeedInner {
                subscription: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Handle the host pushes events through.
    pub fn feed(&self) -> ReplayFeed {
        ReplayFeed {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Loader that always yields this recorder.
    pub fn loader(&self) -> RecorderLoader {
        let recorder = self.clone();
        Arc::new(move || Ok(Arc::new(recorder.clone()) as Arc<dyn Recorder>))
    }
}

impl Default for ChannelRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder for ChannelRecorder {
    fn record(
        &self,
        options: &RecordOptions,
        emit: EventEmitter,
    ) -> Result<Box<dyn RecordingHandle>, RecorderError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        *self.inner.lock() = Some(Subscription {
            id,
            emit,
            options: options.clone(),
            last_accepted: [None; 3],
        });

        Ok(Box::new(ChannelHandle {
            inner: Arc::clone(&self.inner),
            id,
        }))
    }
}

struct ChannelHandle {
    inner: Arc<FeedInner>,
    id: u64,
}

impl RecordingHandle for ChannelHandle {
    fn stop(self: Box<Self>) {
        let mut subscription = self.inner.lock();
        if subscription.as_ref().map(|s| s.id) == Some(self.id) {
            *subscription = None;
        }
    }
}

/// Host-side handle of a [`ChannelRecorder`].
#[derive(Clone)]
pub struct ReplayFeed {
    inner: Arc<FeedInner>,
}

impl ReplayFeed {
    /// Deliver an event. Returns `false` when no subscription is open.
    pub fn push(&self, event: ReplayEvent) -> bool {
        let emit = match self.inner.lock().as_ref() {
            Some(subscription) => subscription.emit.clone(),
            None => return false,
        };
        emit.emit(event);
        true
    }

    /// Deliver a sampled interaction event. Returns `false` when it was
    /// sampled out or no subscription is open.
    pub fn push_interaction(&self, source: InteractionSource, event: ReplayEvent) -> bool {
        let emit = {
            let mut guard = self.inner.lock();
            let Some(subscription) = guard.as_mut() else {
                return false;
            };
            if !subscription.sample(source, event.timestamp) {
                return false;
            }
            subscription.emit.clone()
        };
        emit.emit(event);
        true
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Masking and blocking options of the open subscription.
    pub fn options(&self) -> Option<RecordOptions> {
        self.inner.lock().as_ref().map(|s| s.options.clone())
    }
}
