//! Captured telemetry: entry types, size-capped argument snapshots, and replay
//! event/chunk types.
//!
//! - [`LogEntry`], [`NetworkEntry`], [`ErrorEntry`] - what the captures store
//! - [`CapturedArg`] - size-capped, never-failing argument serialization
//! - [`ReplayEvent`], [`Chunk`] - session-replay output

mod entries;
mod replay;
mod serialize;

pub use entries::{
    ConsoleLevel, ErrorEntry, LogEntry, NetworkEntry, NetworkErrorCategory,
};
pub use replay::{Chunk, ReplayEvent};
pub use serialize::{
    cap_text, snapshot_args, CapturedArg, MAX_SNAPSHOT_ARGS, SERIALIZE_BUDGET_CHARS,
    TRUNCATED_MARKER, UNSERIALIZABLE_MARKER,
};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
