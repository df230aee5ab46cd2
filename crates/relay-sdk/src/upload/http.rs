//! HTTP implementation of the ingest API.
//!
//! Procedures are JSON `POST`s to `{endpoint}/trpc/{procedure}` with a bearer
//! token; successful responses wrap their payload as
//! `{"result": {"data": ...}}`. Signed URL writes are plain `PUT`s.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use relay_core::TransportError;

use super::api::{
    procedures, BlobWriter, ChunkTarget, FeedbackCreated, FeedbackSubmission, IngestApi,
    InitiateUpload, ReplayChunkMeta, ReplayStarted, StoreLogs, UploadTarget,
};
use crate::config::SdkConfig;

/// Connection timeout, capped by the request timeout.
const CONNECT_TIMEOUT_MS: u64 = 5000;

/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Deserialize)]
struct Envelope<T> {
    result: EnvelopeResult<T>,
}

#[derive(Deserialize)]
struct EnvelopeResult<T> {
    data: T,
}

/// `ureq`-backed [`IngestApi`] and [`BlobWriter`].
#[derive(Clone)]
pub struct HttpIngestClient {
    base_url: String,
    api_key: String,
    timeout_ms: u64,
    agent: ureq::Agent,
}

impl HttpIngestClient {
    pub fn new(config: &SdkConfig) -> Self {
        let timeout_ms = config.timeout_ms;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(CONNECT_TIMEOUT_MS.min(timeout_ms)))
            .timeout(Duration::from_millis(timeout_ms))
            .build();

        Self {
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            timeout_ms,
            agent,
        }
    }

    fn procedure_url(&self, procedure: &str) -> String {
        format!("{}/trpc/{}", self.base_url, procedure)
    }

    fn post(&self, procedure: &str, body: &impl Serialize) -> Result<ureq::Response, TransportError> {
        self.agent
            .post(&self.procedure_url(procedure))
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .map_err(|e| map_ureq_error(e, self.timeout_ms))
    }

    /// Call a procedure and decode its `result.data`.
    fn call<R: DeserializeOwned>(
        &self,
        procedure: &str,
        body: &impl Serialize,
    ) -> Result<R, TransportError> {
        let envelope: Envelope<R> = self
            .post(procedure, body)?
            .into_json()
            .map_err(|e| TransportError::Parse(format!("{}: {}", procedure, e)))?;
        Ok(envelope.result.data)
    }

    /// Call a procedure whose response carries nothing we need.
    fn call_unit(&self, procedure: &str, body: &impl Serialize) -> Result<(), TransportError> {
        self.post(procedure, body)?
            .into_string()
            .map(|_| ())
            .map_err(|e| TransportError::Network(e.to_string()))
    }
}

impl IngestApi for HttpIngestClient {
    fn initiate_upload(&self, request: &InitiateUpload) -> Result<UploadTarget, TransportError> {
        self.call(procedures::INITIATE_UPLOAD, request)
    }

    fn complete_upload(&self, media_id: &str) -> Result<(), TransportError> {
        self.call_unit(procedures::COMPLETE_UPLOAD, &json!({ "mediaId": media_id }))
    }

    fn start_replay(&self, session_id: &str) -> Result<ReplayStarted, TransportError> {
        self.call(procedures::START_REPLAY, &json!({ "sessionId": session_id }))
    }

    fn send_replay_chunk(&self, meta: &ReplayChunkMeta) -> Result<ChunkTarget, TransportError> {
        self.call(procedures::SEND_REPLAY_CHUNK, meta)
    }

    fn end_replay(&self, replay_id: &str, total_event_count: u64) -> Result<(), TransportError> {
        self.call_unit(
            procedures::END_REPLAY,
            &json!({ "replayId": replay_id, "totalEventCount": total_event_count }),
        )
    }

    fn store_logs(&self, logs: &StoreLogs) -> Result<(), TransportError> {
        self.call_unit(procedures::STORE_LOGS, logs)
    }

    fn submit_feedback(
        &self,
        feedback: &FeedbackSubmission,
    ) -> Result<FeedbackCreated, TransportError> {
        self.call(procedures::SUBMIT_FEEDBACK, feedback)
    }
}

impl BlobWriter for HttpIngestClient {
    fn put(&self, url: &str, content_type: &str, bytes: &[u8]) -> Result<(), TransportError> {
        self.agent
            .put(url)
            .set("Content-Type", content_type)
            .send_bytes(bytes)
            .map(|_| ())
            .map_err(|e| map_ureq_error(e, self.timeout_ms))
    }
}

/// Map a `ureq` failure onto [`TransportError`].
fn map_ureq_error(error: ureq::Error, timeout_ms: u64) -> TransportError {
    match error {
        ureq::Error::Status(status, resp) => {
            // Read the header before the body consumes the response.
            let retry_after_secs = resp
                .header("Retry-After")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

            if status == 429 {
                return TransportError::RateLimited { retry_after_secs };
            }

            let body: Option<serde_json::Value> = resp.into_json().ok();
            let message = body
                .as_ref()
                .and_then(|v| {
                    v["error"]["message"]
                        .as_str()
                        .or_else(|| v["error"]["json"]["message"].as_str())
                })
                .unwrap_or("Unknown error")
                .to_string();

            TransportError::Api { status, message }
        }
        ureq::Error::Transport(transport) => {
            let msg = transport.to_string();
            if msg.contains("timed out") || msg.contains("timeout") {
                return TransportError::Timeout { timeout_ms };
            }
            TransportError::Network(msg)
        }
    }
}
