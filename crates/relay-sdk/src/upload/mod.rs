//! Shipping captured data to the ingest backend.
//!
//! - [`api`] - the backend interface ([`IngestApi`], [`BlobWriter`]) and its payloads
//! - [`HttpIngestClient`] - `ureq` implementation of both
//! - [`Uploader`] - the metadata-then-write protocol, retry and circuit breaking
//! - [`UploadWorker`] - ordered, best-effort background upload of replay chunks

pub mod api;
mod http;
mod uploader;
mod worker;

pub use api::{
    BlobWriter, FeedbackCreated, FeedbackKind, FeedbackSubmission, IngestApi, InitiateUpload,
    MediaKind, ReplayChunkMeta, StoreLogs, UploadTarget,
};
pub use http::HttpIngestClient;
pub use uploader::{Uploader, CHUNK_CONTENT_TYPE};
pub use worker::{UploadWorker, DEFAULT_QUEUE_CAPACITY};
