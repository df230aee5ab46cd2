//! The SDK entry point.
//!
//! [`RelayClient`] owns one session: its id, the four captures, the uploader
//! and the replay upload worker. Captures are handed out by reference and can
//! be wired into the host (logger, HTTP agent, task handles, replay feed)
//! before or after [`RelayClient::start`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use relay_core::{RelayError, RelayResult};

use crate::capture::{ConsoleCapture, ErrorCapture, NetworkCapture, SelfExclusion};
use crate::config::SdkConfig;
use crate::replay::{RecorderLoader, ReplayCapture};
use crate::upload::{
    BlobWriter, FeedbackKind, FeedbackSubmission, HttpIngestClient, IngestApi, MediaKind,
    StoreLogs, UploadWorker, Uploader, DEFAULT_QUEUE_CAPACITY,
};

/// A file attached to a report.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: None,
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// A user-submitted bug report or piece of feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub kind: FeedbackKind,
    pub title: String,
    pub description: String,
    pub page_url: Option<String>,
    pub screenshot: Option<Attachment>,
    pub attachments: Vec<Attachment>,
}

impl Report {
    pub fn new(kind: FeedbackKind, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: description.into(),
            page_url: None,
            screenshot: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn with_screenshot(mut self, screenshot: Attachment) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// What the backend created for a submitted report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportReceipt {
    pub interaction_id: String,
    /// Screenshot first (if any), then attachments in order.
    pub media_ids: Vec<String>,
}

/// One capture session against the ingest backend.
///
/// Must be created inside a tokio runtime; the replay upload worker is
/// spawned on it.
pub struct RelayClient {
    config: SdkConfig,
    session_id: String,
    console: ConsoleCapture,
    network: NetworkCapture,
    errors: ErrorCapture,
    replay: ReplayCapture,
    uploader: Arc<Uploader>,
    worker: UploadWorker,
    replay_id: Mutex<Option<String>>,
    replay_error: Mutex<Option<String>>,
    started: AtomicBool,
}

impl RelayClient {
    /// Create a client talking to `config.endpoint` over HTTP.
    pub fn new(config: SdkConfig, loader: RecorderLoader) -> RelayResult<Self> {
        config.validate()?;
        let http = Arc::new(HttpIngestClient::new(&config));
        Self::build(config, http.clone(), http, loader)
    }

    /// Create a client from `RELAY_API_KEY` / `RELAY_ENDPOINT`.
    pub fn from_env(loader: RecorderLoader) -> RelayResult<Self> {
        Self::new(SdkConfig::from_env()?, loader)
    }

    /// Create a client with a custom backend and storage writer.
    pub fn with_backend(
        config: SdkConfig,
        api: Arc<dyn IngestApi>,
        writer: Arc<dyn BlobWriter>,
        loader: RecorderLoader,
    ) -> RelayResult<Self> {
        config.validate()?;
        Self::build(config, api, writer, loader)
    }

    fn build(
        config: SdkConfig,
        api: Arc<dyn IngestApi>,
        writer: Arc<dyn BlobWriter>,
        loader: RecorderLoader,
    ) -> RelayResult<Self> {
        let uploader = Arc::new(Uploader::new(
            api,
            writer,
            config.retry.clone(),
            config.chunk_circuit.clone(),
        ));
        let worker = UploadWorker::spawn(Arc::clone(&uploader), DEFAULT_QUEUE_CAPACITY);
        let exclusion = SelfExclusion::new(&config.self_exclusion, &config.endpoint);

        Ok(Self {
            session_id: Uuid::new_v4().to_string(),
            console: ConsoleCapture::new(config.capacities.console),
            network: NetworkCapture::new(config.capacities.network, exclusion),
            errors: ErrorCapture::new(config.capacities.errors),
            replay: ReplayCapture::new(loader, worker.sink()),
            uploader,
            worker,
            replay_id: Mutex::new(None),
            replay_error: Mutex::new(None),
            started: AtomicBool::new(false),
            config,
        })
    }

    /// Start the enabled captures and, with `dom` enabled, a replay session.
    ///
    /// Calling it again while started does nothing. Session replay is
    /// best-effort: if it cannot be opened, the other captures keep running,
    /// the failure is logged and [`replay_error`](Self::replay_error) reports it.
    pub async fn start(&self) -> RelayResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let toggles = self.config.capture;
        if toggles.console {
            self.console.start();
        }
        if toggles.network {
            self.network.start();
        }
        self.errors.start();

        *self.lock_replay_error() = None;
        if toggles.dom {
            if let Err(err) = self.start_replay().await {
                log::warn!(
                    target: "relay_sdk",
                    "Session replay unavailable, continuing without it: {}",
                    err
                );
                *self.lock_replay_error() = Some(err.to_string());
            }
        }

        log::info!(target: "relay_sdk", "Relay session {} started", self.session_id);
        Ok(())
    }

    async fn start_replay(&self) -> RelayResult<()> {
        let uploader = Arc::clone(&self.uploader);
        let session_id = self.session_id.clone();
        let replay_id = tokio::task::spawn_blocking(move || uploader.start_replay(&session_id))
            .await
            .map_err(|e| RelayError::Task(e.to_string()))??;

        self.worker.set_replay_id(Some(replay_id.clone()));
        *self.lock_replay_id() = Some(replay_id.clone());

        if let Err(err) = self.replay.start(self.config.replay.clone()).await {
            self.worker.set_replay_id(None);
            self.lock_replay_id().take();
            self.close_replay(replay_id, 0).await;
            return Err(err);
        }

        log::debug!(target: "relay_sdk", "Replay {} recording", replay_id);
        Ok(())
    }

    /// Close a replay session on the backend; failures are only logged.
    async fn close_replay(&self, replay_id: String, total: u64) {
        let uploader = Arc::clone(&self.uploader);
        let ended = replay_id.clone();
        let result = tokio::task::spawn_blocking(move || uploader.end_replay(&ended, total))
            .await
            .map_err(|e| RelayError::Task(e.to_string()))
            .and_then(|r| r.map_err(RelayError::from));
        if let Err(err) = result {
            log::warn!(target: "relay_sdk", "Failed to close replay {}: {}", replay_id, err);
        }
    }

    /// Stop every capture, upload the last replay chunks and close the
    /// replay session on the backend.
    ///
    /// Captured entries stay available until cleared. Calling it while
    /// stopped does nothing.
    pub async fn stop(&self) -> RelayResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.stop_captures();
        self.replay.stop();
        self.worker.drain().await;

        let replay_id = self.lock_replay_id().take();
        self.worker.set_replay_id(None);

        if let Some(replay_id) = replay_id {
            let total = self.replay.flushed_event_count();
            let uploader = Arc::clone(&self.uploader);
            let ended = replay_id.clone();
            tokio::task::spawn_blocking(move || uploader.end_replay(&ended, total))
                .await
                .map_err(|e| RelayError::Task(e.to_string()))??;

            log::info!(
                target: "relay_sdk",
                "Replay {} closed ({} events, {} chunks uploaded, {} failed)",
                replay_id,
                total,
                self.worker.uploaded(),
                self.worker.failed()
            );
        }
        Ok(())
    }

    /// Submit a report with the current console, network and error logs.
    ///
    /// Runs `submit_feedback`, then `store_logs`, then one upload per
    /// screenshot/attachment. The first failure is returned.
    pub async fn submit_report(&self, report: Report) -> RelayResult<ReportReceipt> {
        let submission = FeedbackSubmission {
            session_id: self.session_id.clone(),
            kind: report.kind,
            title: report.title,
            description: report.description,
            page_url: report.page_url,
            replay_id: self.replay_id(),
            submitted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let console = self.console.get_entries();
        let network = self.network.get_entries();
        let errors = self.errors.get_entries();

        let mut media = Vec::new();
        if let Some(screenshot) = report.screenshot {
            media.push((MediaKind::Screenshot, screenshot));
        }
        media.extend(
            report
                .attachments
                .into_iter()
                .map(|attachment| (MediaKind::Attachment, attachment)),
        );

        let uploader = Arc::clone(&self.uploader);
        let receipt = tokio::task::spawn_blocking(move || -> RelayResult<ReportReceipt> {
            let created = uploader.submit_feedback(&submission)?;
            let interaction_id = created.interaction_id;

            uploader.store_logs(&StoreLogs {
                interaction_id: interaction_id.clone(),
                console,
                network,
                errors,
            })?;

            let mut media_ids = Vec::with_capacity(media.len());
            for (kind, attachment) in media {
                media_ids.push(uploader.upload_binary(
                    &interaction_id,
                    kind,
                    &attachment.content_type,
                    &attachment.bytes,
                    attachment.filename.as_deref(),
                )?);
            }

            Ok(ReportReceipt {
                interaction_id,
                media_ids,
            })
        })
        .await
        .map_err(|e| RelayError::Task(e.to_string()))??;

        log::info!(
            target: "relay_sdk",
            "Report {} submitted with {} file(s)",
            receipt.interaction_id,
            receipt.media_ids.len()
        );
        Ok(receipt)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Why session replay is not running this session, if it failed to start.
    pub fn replay_error(&self) -> Option<String> {
        self.lock_replay_error().clone()
    }

    /// Backend id of the open replay session.
    pub fn replay_id(&self) -> Option<String> {
        self.lock_replay_id().clone()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn console(&self) -> &ConsoleCapture {
        &self.console
    }

    pub fn network(&self) -> &NetworkCapture {
        &self.network
    }

    pub fn errors(&self) -> &ErrorCapture {
        &self.errors
    }

    pub fn replay(&self) -> &ReplayCapture {
        &self.replay
    }

    /// Whether background chunk uploads are paused by the circuit breaker.
    pub fn is_upload_circuit_open(&self) -> bool {
        self.uploader.is_chunk_circuit_open()
    }

    fn stop_captures(&self) {
        self.console.stop();
        self.network.stop();
        self.errors.stop();
    }

    fn lock_replay_id(&self) -> MutexGuard<'_, Option<String>> {
        self.replay_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_replay_error(&self) -> MutexGuard<'_, Option<String>> {
        self.replay_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
