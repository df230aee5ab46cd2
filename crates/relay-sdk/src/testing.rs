//! In-memory ingest backend and signed-URL storage for tests.
//!
//! ```rust,ignore
//! use relay_sdk::testing::{MockBackend, MockStorage};
//!
//! let backend = Arc::new(MockBackend::default());
//! let storage = Arc::new(MockStorage::default());
//! let client = RelayClient::with_backend(config, backend.clone(), storage.clone(), loader)?;
//! // ... drive the client ...
//! assert_eq!(backend.chunk_calls().len(), 3);
//! ```

use std::sync::Mutex;

use relay_core::TransportError;

use crate::upload::api::{
    BlobWriter, ChunkTarget, FeedbackCreated, FeedbackSubmission, IngestApi, InitiateUpload,
    ReplayChunkMeta, ReplayStarted, StoreLogs, UploadTarget,
};

#[derive(Default)]
struct Calls {
    initiated: Vec<InitiateUpload>,
    completed: Vec<String>,
    replays_started: Vec<String>,
    chunks: Vec<ReplayChunkMeta>,
    replays_ended: Vec<(String, u64)>,
    logs: Vec<StoreLogs>,
    feedback: Vec<FeedbackSubmission>,
    chunk_failure: Option<TransportError>,
    initiate_failures: Option<(u32, TransportError)>,
    store_logs_failure: Option<TransportError>,
}

/// Records every [`IngestApi`] call and answers with predictable ids.
///
/// Media ids are `media_{n}` for the n-th initiate call, interaction ids
/// `int_{n}`, replay ids `rp_{n}`; chunk URLs point at
/// `https://storage.test/replays/{replay_id}/{index}`.
#[derive(Default)]
pub struct MockBackend {
    calls: Mutex<Calls>,
}

impl MockBackend {
    /// Fail every `send_replay_chunk` call with `error`.
    pub fn fail_chunks(&self, error: TransportError) {
        self.lock().chunk_failure = Some(error);
    }

    /// Fail the next `count` `initiate_upload` calls with `error`.
    pub fn fail_next_initiates(&self, count: u32, error: TransportError) {
        self.lock().initiate_failures = Some((count, error));
    }

    /// Fail every `store_logs` call with `error`.
    pub fn fail_store_logs(&self, error: TransportError) {
        self.lock().store_logs_failure = Some(error);
    }

    pub fn initiated(&self) -> Vec<InitiateUpload> {
        self.lock().initiated.clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.lock().completed.clone()
    }

    pub fn replays_started(&self) -> Vec<String> {
        self.lock().replays_started.clone()
    }

    pub fn chunk_calls(&self) -> Vec<ReplayChunkMeta> {
        self.lock().chunks.clone()
    }

    pub fn replays_ended(&self) -> Vec<(String, u64)> {
        self.lock().replays_ended.clone()
    }

    pub fn stored_logs(&self) -> Vec<StoreLogs> {
        self.lock().logs.clone()
    }

    pub fn feedback(&self) -> Vec<FeedbackSubmission> {
        self.lock().feedback.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl IngestApi for MockBackend {
    fn initiate_upload(&self, request: &InitiateUpload) -> Result<UploadTarget, TransportError> {
        let mut calls = self.lock();
        calls.initiated.push(request.clone());
        let n = calls.initiated.len();

        if let Some((remaining, error)) = calls.initiate_failures.take() {
            if remaining > 0 {
                calls.initiate_failures = Some((remaining - 1, error.clone()));
                return Err(error);
            }
        }

        Ok(UploadTarget {
            media_id: format!("media_{n}"),
            upload_url: format!("https://storage.test/media/media_{n}"),
        })
    }

    fn complete_upload(&self, media_id: &str) -> Result<(), TransportError> {
        self.lock().completed.push(media_id.to_string());
        Ok(())
    }

    fn start_replay(&self, session_id: &str) -> Result<ReplayStarted, TransportError> {
        let mut calls = self.lock();
        calls.replays_started.push(session_id.to_string());
        Ok(ReplayStarted {
            replay_id: format!("rp_{}", calls.replays_started.len()),
        })
    }

    fn send_replay_chunk(&self, meta: &ReplayChunkMeta) -> Result<ChunkTarget, TransportError> {
        let mut calls = self.lock();
        calls.chunks.push(meta.clone());
        if let Some(error) = &calls.chunk_failure {
            return Err(error.clone());
        }
        Ok(ChunkTarget {
            upload_url: format!(
                "https://storage.test/replays/{}/{}",
                meta.replay_id, meta.chunk_index
            ),
        })
    }

    fn end_replay(&self, replay_id: &str, total_event_count: u64) -> Result<(), TransportError> {
        self.lock()
            .replays_ended
            .push((replay_id.to_string(), total_event_count));
        Ok(())
    }

    fn store_logs(&self, logs: &StoreLogs) -> Result<(), TransportError> {
        let mut calls = self.lock();
        if let Some(error) = &calls.store_logs_failure {
            return Err(error.clone());
        }
        calls.logs.push(logs.clone());
        Ok(())
    }

    fn submit_feedback(
        &self,
        feedback: &FeedbackSubmission,
    ) -> Result<FeedbackCreated, TransportError> {
        let mut calls = self.lock();
        calls.feedback.push(feedback.clone());
        Ok(FeedbackCreated {
            interaction_id: format!("int_{}", calls.feedback.len()),
        })
    }
}

/// One write to a signed URL: `(url, content_type, bytes)`.
pub type StoredWrite = (String, String, Vec<u8>);

/// Records signed-URL writes; optionally fails all of them.
#[derive(Default)]
pub struct MockStorage {
    writes: Mutex<Vec<StoredWrite>>,
    failure: Mutex<Option<TransportError>>,
}

impl MockStorage {
    /// Storage that rejects every write with `error`.
    pub fn failing(error: TransportError) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(error)),
        }
    }

    /// Change the failure mode; `None` accepts writes again.
    pub fn set_failure(&self, error: Option<TransportError>) {
        *self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = error;
    }

    /// Successful writes, in order.
    pub fn writes(&self) -> Vec<StoredWrite> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl BlobWriter for MockStorage {
    fn put(&self, url: &str, content_type: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(error) = failure {
            return Err(error);
        }

        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((url.to_string(), content_type.to_string(), bytes.to_vec()));
        Ok(())
    }
}
