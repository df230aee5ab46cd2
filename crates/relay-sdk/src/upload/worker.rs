//! Background upload of replay chunks.
//!
//! One tokio task consumes a bounded queue, so chunks upload one at a time in
//! the order they were sealed. Uploads are best-effort: a failed chunk is
//! logged and counted, and the worker moves on to the next one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use relay_core::telemetry::Chunk;
use relay_core::{RelayError, RelayResult};

use super::uploader::Uploader;
use crate::replay::ChunkSink;

/// Chunks that may wait for upload before new ones are refused.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

enum Job {
    Chunk { replay_id: String, chunk: Chunk },
    Drain(oneshot::Sender<()>),
}

#[derive(Default)]
struct WorkerStats {
    uploaded: AtomicU64,
    failed: AtomicU64,
}

/// Handle to the chunk upload task.
pub struct UploadWorker {
    tx: mpsc::Sender<Job>,
    replay_id: Arc<Mutex<Option<String>>>,
    stats: Arc<WorkerStats>,
    capacity: usize,
    task: JoinHandle<()>,
}

impl UploadWorker {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(uploader: Arc<Uploader>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(WorkerStats::default());
        let task = tokio::spawn(run(rx, uploader, Arc::clone(&stats)));

        Self {
            tx,
            replay_id: Arc::new(Mutex::new(None)),
            stats,
            capacity,
            task,
        }
    }

    /// Replay id attached to chunks handed to the sink from now on.
    pub fn set_replay_id(&self, replay_id: Option<String>) {
        *lock(&self.replay_id) = replay_id;
    }

    pub fn replay_id(&self) -> Option<String> {
        lock(&self.replay_id).clone()
    }

    /// Sink that queues chunks for this worker without blocking.
    pub fn sink(&self) -> Arc<dyn ChunkSink> {
        Arc::new(WorkerSink {
            tx: self.tx.clone(),
            replay_id: Arc::clone(&self.replay_id),
            capacity: self.capacity,
        })
    }

    /// Wait until every chunk queued so far has been attempted.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Drain(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Chunks uploaded successfully.
    pub fn uploaded(&self) -> u64 {
        self.stats.uploaded.load(Ordering::Relaxed)
    }

    /// Chunks whose upload failed.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct WorkerSink {
    tx: mpsc::Sender<Job>,
    replay_id: Arc<Mutex<Option<String>>>,
    capacity: usize,
}

impl ChunkSink for WorkerSink {
    fn send(&self, chunk: Chunk) -> RelayResult<()> {
        let replay_id = lock(&self.replay_id)
            .clone()
            .ok_or_else(|| RelayError::not_started("no replay session is open"))?;

        self.tx
            .try_send(Job::Chunk { replay_id, chunk })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => RelayError::QueueFull(self.capacity),
                mpsc::error::TrySendError::Closed(_) => {
                    RelayError::not_started("upload worker has shut down")
                }
            })
    }
}

async fn run(mut rx: mpsc::Receiver<Job>, uploader: Arc<Uploader>, stats: Arc<WorkerStats>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Chunk { replay_id, chunk } => {
                let index = chunk.index;
                let uploader = Arc::clone(&uploader);
                let result =
                    tokio::task::spawn_blocking(move || uploader.upload_chunk(&replay_id, &chunk))
                        .await;

                match result {
                    Ok(Ok(())) => {
                        stats.uploaded.fetch_add(1, Ordering::Relaxed);
                        log::debug!(target: "relay_sdk::upload", "Uploaded replay chunk {}", index);
                    }
                    Ok(Err(e)) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            target: "relay_sdk::upload",
                            "Replay chunk {} upload failed: {}",
                            index,
                            e
                        );
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        log::warn!(
                            target: "relay_sdk::upload",
                            "Replay chunk {} upload task failed: {}",
                            index,
                            e
                        );
                    }
                }
            }
            Job::Drain(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockStorage};
    use relay_core::http::{CircuitConfig, RetryPolicy};
    use relay_core::telemetry::ReplayEvent;
    use relay_core::TransportError;
    use serde_json::json;

    fn chunk(index: u32) -> Chunk {
        Chunk::seal(index, vec![ReplayEvent::new(ReplayEvent::META, index as u64, json!({}))])
            .unwrap()
    }

    fn worker(backend: &Arc<MockBackend>, storage: &Arc<MockStorage>, capacity: usize) -> UploadWorker {
        let uploader = Uploader::new(
            backend.clone(),
            storage.clone(),
            RetryPolicy::single_attempt(),
            CircuitConfig::default(),
        );
        UploadWorker::spawn(Arc::new(uploader), capacity)
    }

    #[tokio::test]
    async fn test_uploads_in_order() {
        let backend = Arc::new(MockBackend::default());
        let storage = Arc::new(MockStorage::default());
        let worker = worker(&backend, &storage, 8);
        worker.set_replay_id(Some("rp_1".into()));

        let sink = worker.sink();
        for index in 0..5 {
            sink.send(chunk(index)).unwrap();
        }
        worker.drain().await;

        let indices: Vec<u32> = backend.chunk_calls().iter().map(|m| m.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(worker.uploaded(), 5);
        assert_eq!(storage.writes().len(), 5);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_propagated() {
        let backend = Arc::new(MockBackend::default());
        let storage = Arc::new(MockStorage::failing(TransportError::Network("reset".into())));
        let worker = worker(&backend, &storage, 8);
        worker.set_replay_id(Some("rp_1".into()));

        worker.sink().send(chunk(0)).unwrap();
        worker.drain().await;

        assert_eq!(worker.failed(), 1);
        assert_eq!(worker.uploaded(), 0);
    }

    #[tokio::test]
    async fn test_sink_without_replay_id_refuses() {
        let backend = Arc::new(MockBackend::default());
        let storage = Arc::new(MockStorage::default());
        let worker = worker(&backend, &storage, 8);

        let err = worker.sink().send(chunk(0)).unwrap_err();
        assert!(matches!(err, RelayError::NotStarted(_)));
    }

    #[tokio::test]
    async fn test_full_queue_refuses() {
        let backend = Arc::new(MockBackend::default());
        let storage = Arc::new(MockStorage::default());
        let worker = worker(&backend, &storage, 1);
        worker.set_replay_id(Some("rp_1".into()));
        let sink = worker.sink();

        // The worker task has not run yet on this single-threaded runtime.
        sink.send(chunk(0)).unwrap();
        let err = sink.send(chunk(1)).unwrap_err();
        assert!(matches!(err, RelayError::QueueFull(1)));

        worker.drain().await;
        assert_eq!(worker.uploaded(), 1);
    }
}
