//! Relay SDK - in-app bug reporting with console, network, error and
//! session-replay capture.
//!
//! The SDK observes the host application without changing what it does:
//! every capture forwards to or returns exactly what the host would have seen
//! without it, holds a bounded amount of memory, and never records the SDK's
//! own traffic.
//!
//! # Architecture
//!
//! ```text
//! host logger ──► CaptureLogger ──► ConsoleCapture ─┐
//! ureq agent ──► CaptureMiddleware ─► NetworkCapture├─► submit_report ─► IngestApi
//! panics / task errors ───────────► ErrorCapture ───┘
//! recorder ──► ReplayCapture ──► Chunk ──► UploadWorker ──► Uploader ──► IngestApi + BlobWriter
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use relay_sdk::{ChannelRecorder, RelayClient, Report, SdkConfig};
//! use relay_sdk::upload::FeedbackKind;
//!
//! let recorder = ChannelRecorder::new();
//! let client = RelayClient::new(SdkConfig::from_env()?, recorder.loader())?;
//!
//! // Wire the captures into the host.
//! client.console().install(Box::new(my_logger), log::LevelFilter::Info);
//! let agent = ureq::AgentBuilder::new()
//!     .middleware(client.network().middleware())
//!     .build();
//! let feed = recorder.feed();
//!
//! client.start().await?;
//! // ... the app runs, feed.push(event) for UI activity ...
//! let receipt = client
//!     .submit_report(Report::new(FeedbackKind::Bug, "Checkout broken", "Pay does nothing"))
//!     .await?;
//! client.stop().await?;
//! ```

pub mod capture;
pub mod client;
pub mod config;
pub mod replay;
pub mod upload;

/// In-memory backend and storage fakes
#[doc(hidden)]
pub mod testing;

pub use capture::{
    CaptureLogger, CaptureMiddleware, ConsoleCapture, ErrorCapture, NetworkCapture,
    ObservedResponse, PendingCall, Rejection, RejectionReporter, SelfExclusion,
};
pub use client::{Attachment, RelayClient, Report, ReportReceipt};
pub use config::{
    Capacities, CaptureToggles, RecordOptions, ReplayConfig, SamplingConfig, SdkConfig,
    SelfExclusionConfig,
};
pub use replay::{
    ChannelRecorder, ChunkSink, EventEmitter, InteractionSource, Recorder, RecorderLoader,
    RecordingHandle, ReplayCapture, ReplayFeed,
};

pub use relay_core::telemetry::{
    CapturedArg, Chunk, ConsoleLevel, ErrorEntry, LogEntry, NetworkEntry, ReplayEvent,
};
pub use relay_core::{RecorderError, RelayError, RelayResult, TransportError, UploadError};
