//! Two-step uploads: a metadata call that returns a signed URL, then a raw
//! write of the bytes to that URL.
//!
//! The two steps are not atomic. A metadata call that succeeds followed by a
//! write that fails is reported as [`UploadError::BinaryWrite`] so callers
//! can tell an orphaned metadata record from a call that never happened.
//!
//! # Resilience
//!
//! - Metadata calls made on behalf of a user action retry with backoff
//!   ([`RetryPolicy`]), honoring `Retry-After`
//! - Replay chunks go out once; a circuit breaker stops chunk uploads while
//!   the backend keeps failing

use std::sync::Arc;

use relay_core::http::{with_retry, CircuitBreaker, CircuitConfig, RetryPolicy};
use relay_core::telemetry::Chunk;
use relay_core::{TransportError, UploadError};

use super::api::{
    BlobWriter, FeedbackCreated, FeedbackSubmission, IngestApi, InitiateUpload, MediaKind,
    ReplayChunkMeta, StoreLogs,
};

/// Content type of replay chunk bodies.
pub const CHUNK_CONTENT_TYPE: &str = "application/json";

/// Drives the upload protocol against an [`IngestApi`] and a [`BlobWriter`].
///
/// Every method blocks; async callers run them in `spawn_blocking`.
pub struct Uploader {
    api: Arc<dyn IngestApi>,
    writer: Arc<dyn BlobWriter>,
    retry_policy: RetryPolicy,
    chunk_circuit: CircuitBreaker,
}

impl Uploader {
    pub fn new(
        api: Arc<dyn IngestApi>,
        writer: Arc<dyn BlobWriter>,
        retry_policy: RetryPolicy,
        chunk_circuit: CircuitConfig,
    ) -> Self {
        Self {
            api,
            writer,
            retry_policy,
            chunk_circuit: CircuitBreaker::new(chunk_circuit),
        }
    }

    /// Upload one replay chunk: register it, then write its events.
    ///
    /// Single attempt. Skipped with [`TransportError::CircuitOpen`] while the
    /// chunk circuit is open.
    pub fn upload_chunk(&self, replay_id: &str, chunk: &Chunk) -> Result<(), UploadError> {
        if !self.chunk_circuit.can_execute() {
            return Err(UploadError::Metadata {
                step: "send_replay_chunk",
                source: TransportError::CircuitOpen(
                    "replay chunk uploads paused after repeated failures".to_string(),
                ),
            });
        }

        let bytes = chunk.to_upload_bytes().map_err(|e| UploadError::Encode {
            target: format!("replay chunk {}", chunk.index),
            message: e.to_string(),
        })?;

        let meta = ReplayChunkMeta {
            replay_id: replay_id.to_string(),
            chunk_index: chunk.index,
            event_count: chunk.event_count() as u64,
            start_time: chunk.start_time_ms,
            end_time: chunk.end_time_ms,
        };

        let target = self.api.send_replay_chunk(&meta).map_err(|source| {
            self.record_chunk_failure(&source);
            UploadError::Metadata {
                step: "send_replay_chunk",
                source,
            }
        })?;

        self.writer
            .put(&target.upload_url, CHUNK_CONTENT_TYPE, &bytes)
            .map_err(|source| {
                self.record_chunk_failure(&source);
                UploadError::BinaryWrite {
                    target: format!("replay chunk {}", chunk.index),
                    source,
                }
            })?;

        self.chunk_circuit.record_success();
        Ok(())
    }

    /// Upload a screenshot or attachment: initiate, write, complete.
    ///
    /// Returns the media id. Each step retries transient failures.
    pub fn upload_binary(
        &self,
        interaction_id: &str,
        kind: MediaKind,
        content_type: &str,
        bytes: &[u8],
        filename: Option<&str>,
    ) -> Result<String, UploadError> {
        let request = InitiateUpload {
            interaction_id: interaction_id.to_string(),
            kind,
            content_type: content_type.to_string(),
            size_bytes: bytes.len() as u64,
            filename: filename.map(str::to_string),
        };

        let target = self
            .retrying(|| self.api.initiate_upload(&request))
            .map_err(|source| UploadError::Metadata {
                step: "initiate_upload",
                source,
            })?;

        self.retrying(|| self.writer.put(&target.upload_url, content_type, bytes))
            .map_err(|source| UploadError::BinaryWrite {
                target: format!("{} {}", kind.as_str(), target.media_id),
                source,
            })?;

        self.retrying(|| self.api.complete_upload(&target.media_id))
            .map_err(|source| UploadError::Complete {
                media_id: target.media_id.clone(),
                source,
            })?;

        log::debug!(
            target: "relay_sdk::upload",
            "Uploaded {} {} ({} bytes)",
            kind.as_str(),
            target.media_id,
            bytes.len()
        );
        Ok(target.media_id)
    }

    /// Open a replay session on the backend; returns the replay id.
    pub fn start_replay(&self, session_id: &str) -> Result<String, TransportError> {
        self.retrying(|| self.api.start_replay(session_id))
            .map(|started| started.replay_id)
    }

    pub fn end_replay(&self, replay_id: &str, total_event_count: u64) -> Result<(), TransportError> {
        self.retrying(|| self.api.end_replay(replay_id, total_event_count))
    }

    pub fn submit_feedback(
        &self,
        feedback: &FeedbackSubmission,
    ) -> Result<FeedbackCreated, TransportError> {
        self.retrying(|| self.api.submit_feedback(feedback))
    }

    pub fn store_logs(&self, logs: &StoreLogs) -> Result<(), TransportError> {
        self.retrying(|| self.api.store_logs(logs))
    }

    /// Check if the chunk circuit breaker is open.
    pub fn is_chunk_circuit_open(&self) -> bool {
        self.chunk_circuit.is_open()
    }

    /// Reset the chunk circuit breaker to closed state.
    pub fn reset_chunk_circuit(&self) {
        self.chunk_circuit.reset();
    }

    fn retrying<T, F>(&self, operation: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Result<T, TransportError>,
    {
        with_retry(&self.retry_policy, operation).into_result()
    }

    fn record_chunk_failure(&self, error: &TransportError) {
        match error {
            TransportError::RateLimited { .. } => self.chunk_circuit.record_rate_limited(),
            _ => self.chunk_circuit.record_failure(),
        }
    }
}
