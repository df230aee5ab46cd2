//! Session-replay events and the chunks they are shipped in.

use serde::{Deserialize, Serialize};

/// One recorder event. The SDK never inspects `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    /// Recorder-specific event type (full snapshot, incremental mutation, ...).
    #[serde(rename = "type")]
    pub kind: u8,
    pub timestamp: u64,
    pub data: serde_json::Value,
}

impl ReplayEvent {
    pub const DOM_CONTENT_LOADED: u8 = 0;
    pub const LOAD: u8 = 1;
    pub const FULL_SNAPSHOT: u8 = 2;
    pub const INCREMENTAL_SNAPSHOT: u8 = 3;
    pub const META: u8 = 4;
    pub const CUSTOM: u8 = 5;

    pub fn new(kind: u8, timestamp: u64, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp,
            data,
        }
    }
}

/// An immutable, ordered batch of replay events.
///
/// `index` starts at 0 for each replay session and increases by one per chunk.
/// A chunk always holds at least one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: u32,
    pub events: Vec<ReplayEvent>,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
}

impl Chunk {
    /// Build a chunk from pending events; `None` when there is nothing to ship.
    pub fn seal(index: u32, events: Vec<ReplayEvent>) -> Option<Self> {
        let start_time_ms = events.iter().map(|e| e.timestamp).min()?;
        let end_time_ms = events.iter().map(|e| e.timestamp).max()?;
        Some(Self {
            index,
            events,
            start_time_ms,
            end_time_ms,
        })
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Body written to the chunk's signed upload URL.
    pub fn to_upload_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.events)
    }
}
