//! Session-replay capture.
//!
//! ```text
//!            start(config)                    stop()
//!   IDLE ─────────────────────► RECORDING ─────────────► IDLE
//!                                 │   ▲
//!                     emit/timer  │   │ flush: pending -> Chunk -> sink
//!                                 └───┘
//! ```
//!
//! Events from the recorder accumulate in a pending sequence. A flush turns
//! the pending events into one immutable [`Chunk`] and hands it to the
//! [`ChunkSink`]. Flushes happen when the trip-wire count is reached, when the
//! flush interval has passed (checked on every event and by a periodic
//! timer), and once more on `stop()`. Empty flushes are no-ops, so chunk
//! indices are gapless.

mod recorder;

pub use recorder::{
    ChannelRecorder, EventEmitter, InteractionSource, Recorder, RecorderLoader, RecordingHandle,
    ReplayFeed,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use relay_core::telemetry::{Chunk, ReplayEvent};
use relay_core::{RecorderError, RelayResult};

use crate::config::ReplayConfig;

/// Receives sealed chunks, in index order.
///
/// Called while the replay state is locked: implementations must hand the
/// chunk off without blocking and must not call back into the capture.
pub trait ChunkSink: Send + Sync {
    fn send(&self, chunk: Chunk) -> RelayResult<()>;
}

impl<F> ChunkSink for F
where
    F: Fn(Chunk) -> RelayResult<()> + Send + Sync,
{
    fn send(&self, chunk: Chunk) -> RelayResult<()> {
        self(chunk)
    }
}

struct State {
    recording: bool,
    /// Bumped on every start; events from older subscriptions are ignored.
    generation: u64,
    config: ReplayConfig,
    pending: Vec<ReplayEvent>,
    chunk_index: u32,
    last_flush: Instant,
    flushed_events: u64,
    handle: Option<Box<dyn RecordingHandle>>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    state: Mutex<State>,
    sink: Arc<dyn ChunkSink>,
    loader: RecorderLoader,
    recorder: OnceCell<Arc<dyn Recorder>>,
    dropped_chunks: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn on_event(&self, generation: u64, event: ReplayEvent) {
        let mut state = self.lock();
        if !state.recording || state.generation != generation {
            return;
        }

        state.pending.push(event);

        let interval = Duration::from_millis(state.config.flush_interval_ms);
        if state.pending.len() >= state.config.max_events_per_chunk
            || state.last_flush.elapsed() >= interval
        {
            self.flush(&mut state, false);
        }
    }

    fn on_tick(&self, generation: u64) {
        let mut state = self.lock();
        if state.recording && state.generation == generation {
            self.flush(&mut state, false);
        }
    }

    /// Seal pending events into the next chunk.
    ///
    /// With `keep_events`, returns a copy of the sealed events; otherwise
    /// returns an empty list.
    fn flush(&self, state: &mut State, keep_events: bool) -> Vec<ReplayEvent> {
        let events = std::mem::take(&mut state.pending);
        let Some(chunk) = Chunk::seal(state.chunk_index, events) else {
            return Vec::new();
        };

        let index = chunk.index;
        let event_count = chunk.event_count();
        state.chunk_index += 1;
        state.flushed_events += event_count as u64;
        state.last_flush = Instant::now();

        let kept = if keep_events {
            chunk.events.clone()
        } else {
            Vec::new()
        };
        if let Err(err) = self.sink.send(chunk) {
            self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                target: "relay_sdk::replay",
                "Dropping replay chunk {} ({} events): {}",
                index,
                event_count,
                err
            );
        }
        kept
    }
}

/// Session-replay state machine.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct ReplayCapture {
    inner: Arc<Inner>,
}

impl ReplayCapture {
    pub fn new(loader: RecorderLoader, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    recording: false,
                    generation: 0,
                    config: ReplayConfig::default(),
                    pending: Vec::new(),
                    chunk_index: 0,
                    last_flush: Instant::now(),
                    flushed_events: 0,
                    handle: None,
                    timer: None,
                }),
                sink,
                loader,
                recorder: OnceCell::new(),
                dropped_chunks: AtomicU64::new(0),
            }),
        }
    }

    /// Start recording a new replay session. Does nothing while recording.
    ///
    /// Loads the recorder on first use; the loaded recorder is kept for the
    /// lifetime of this capture.
    pub async fn start(&self, config: ReplayConfig) -> RelayResult<()> {
        if self.is_recording() {
            return Ok(());
        }

        let recorder = self.recorder().await?;

        let generation = {
            let mut state = self.inner.lock();
            if state.recording {
                return Ok(());
            }
            state.recording = true;
            state.generation += 1;
            state.pending.clear();
            state.chunk_index = 0;
            state.flushed_events = 0;
            state.last_flush = Instant::now();
            state.config = config.clone();
            state.generation
        };

        let weak = Arc::downgrade(&self.inner);
        let emitter = EventEmitter::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(generation, event);
            }
        });

        // The recorder may emit from inside `record`, so the state lock is
        // not held here.
        let handle = match recorder.record(&config.record, emitter) {
            Ok(handle) => handle,
            Err(err) => {
                let mut state = self.inner.lock();
                if state.generation == generation {
                    state.recording = false;
                }
                return Err(err.into());
            }
        };

        let mut state = self.inner.lock();
        if !state.recording || state.generation != generation {
            // Stopped while the subscription was opening.
            drop(state);
            handle.stop();
            return Ok(());
        }
        state.handle = Some(handle);
        state.timer = Some(spawn_timer(
            Arc::downgrade(&self.inner),
            generation,
            Duration::from_millis(config.flush_interval_ms.max(1)),
        ));

        log::debug!(
            target: "relay_sdk::replay",
            "Replay recording started (flush every {}ms, at most {} events per chunk)",
            config.flush_interval_ms,
            config.max_events_per_chunk
        );
        Ok(())
    }

    /// Stop recording and flush what is pending, even below the trip-wire.
    ///
    /// Returns the events of that final flush. Does nothing and returns an
    /// empty list when not recording.
    pub fn stop(&self) -> Vec<ReplayEvent> {
        let (handle, timer, events) = {
            let mut state = self.inner.lock();
            if !state.recording {
                return Vec::new();
            }
            state.recording = false;
            let events = self.inner.flush(&mut state, true);
            (state.handle.take(), state.timer.take(), events)
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(handle) = handle {
            handle.stop();
        }

        log::debug!(target: "relay_sdk::replay", "Replay recording stopped");
        events
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().recording
    }

    /// Copy of the events not yet flushed.
    pub fn get_events(&self) -> Vec<ReplayEvent> {
        self.inner.lock().pending.clone()
    }

    /// Discard the events not yet flushed.
    pub fn clear_events(&self) {
        self.inner.lock().pending.clear();
    }

    /// Index the next chunk will get (= chunks flushed this session).
    pub fn next_chunk_index(&self) -> u32 {
        self.inner.lock().chunk_index
    }

    /// Events handed to the sink this session.
    pub fn flushed_event_count(&self) -> u64 {
        self.inner.lock().flushed_events
    }

    /// Chunks the sink refused since creation.
    pub fn dropped_chunks(&self) -> u64 {
        self.inner.dropped_chunks.load(Ordering::Relaxed)
    }

    async fn recorder(&self) -> Result<Arc<dyn Recorder>, RecorderError> {
        let loader = Arc::clone(&self.inner.loader);
        self.inner
            .recorder
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| RecorderError::Load(format!("loader task failed: {}", e)))?
            })
            .await
            .cloned()
    }
}

fn spawn_timer(inner: Weak<Inner>, generation: u64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match inner.upgrade() {
                Some(inner) => inner.on_tick(generation),
                None => return,
            }
        }
    })
}
