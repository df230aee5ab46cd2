//! Ingest backend interface.
//!
//! The backend is an external collaborator: [`IngestApi`] names the calls the
//! SDK makes and [`BlobWriter`] the raw writes to signed storage URLs.
//! [`HttpIngestClient`](super::HttpIngestClient) implements both over HTTP.

use serde::{Deserialize, Serialize};

use relay_core::telemetry::{ErrorEntry, LogEntry, NetworkEntry};
use relay_core::TransportError;

/// Procedure names, appended to `{endpoint}/trpc/`.
pub mod procedures {
    pub const INITIATE_UPLOAD: &str = "media.initiateUpload";
    pub const COMPLETE_UPLOAD: &str = "media.completeUpload";
    pub const START_REPLAY: &str = "replay.start";
    pub const SEND_REPLAY_CHUNK: &str = "replay.chunk";
    pub const END_REPLAY: &str = "replay.end";
    pub const STORE_LOGS: &str = "logs.store";
    pub const SUBMIT_FEEDBACK: &str = "feedback.submit";
}

/// What kind of file an upload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Screenshot,
    Attachment,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Screenshot => "screenshot",
            MediaKind::Attachment => "attachment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUpload {
    pub interaction_id: String,
    pub kind: MediaKind,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Where to write an upload's bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub media_id: String,
    pub upload_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStarted {
    pub replay_id: String,
}

/// Metadata sent for each replay chunk before its events are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayChunkMeta {
    pub replay_id: String,
    pub chunk_index: u32,
    pub event_count: u64,
    pub start_time: u64,
    pub end_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkTarget {
    pub upload_url: String,
}

/// Ring log snapshots attached to a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreLogs {
    pub interaction_id: String,
    pub console: Vec<LogEntry>,
    pub network: Vec<NetworkEntry>,
    pub errors: Vec<ErrorEntry>,
}

/// Report category chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Bug,
    Feedback,
    Idea,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub session_id: String,
    pub kind: FeedbackKind,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay_id: Option<String>,
    /// RFC 3339 time the user submitted the report.
    pub submitted_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackCreated {
    pub interaction_id: String,
}

/// Calls the SDK makes against the ingest backend.
///
/// Implementations block; the SDK calls them from blocking threads.
pub trait IngestApi: Send + Sync {
    /// Reserve a media record and a signed URL to write its bytes to.
    fn initiate_upload(&self, request: &InitiateUpload) -> Result<UploadTarget, TransportError>;

    /// Mark a media record's bytes as written.
    fn complete_upload(&self, media_id: &str) -> Result<(), TransportError>;

    fn start_replay(&self, session_id: &str) -> Result<ReplayStarted, TransportError>;

    /// Register a chunk and get the signed URL for its events.
    fn send_replay_chunk(&self, meta: &ReplayChunkMeta) -> Result<ChunkTarget, TransportError>;

    fn end_replay(&self, replay_id: &str, total_event_count: u64) -> Result<(), TransportError>;

    fn store_logs(&self, logs: &StoreLogs) -> Result<(), TransportError>;

    fn submit_feedback(
        &self,
        feedback: &FeedbackSubmission,
    ) -> Result<FeedbackCreated, TransportError>;
}

/// Writes bytes to a signed storage URL. No SDK credentials are sent.
pub trait BlobWriter: Send + Sync {
    fn put(&self, url: &str, content_type: &str, bytes: &[u8]) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_meta_wire_names() {
        let meta = ReplayChunkMeta {
            replay_id: "rp_1".into(),
            chunk_index: 3,
            event_count: 12,
            start_time: 100,
            end_time: 250,
        };
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            json!({
                "replayId": "rp_1",
                "chunkIndex": 3,
                "eventCount": 12,
                "startTime": 100,
                "endTime": 250
            })
        );
    }

    #[test]
    fn test_initiate_upload_omits_missing_filename() {
        let request = InitiateUpload {
            interaction_id: "int_9".into(),
            kind: MediaKind::Screenshot,
            content_type: "image/png".into(),
            size_bytes: 2048,
            filename: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["kind"], "screenshot");
        assert_eq!(value["sizeBytes"], 2048);
        assert!(value.get("filename").is_none());
    }

    #[test]
    fn test_feedback_created_parses() {
        let created: FeedbackCreated =
            serde_json::from_value(json!({ "interactionId": "int_1" })).unwrap();
        assert_eq!(created.interaction_id, "int_1");
    }
}
