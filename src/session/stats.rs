use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Snapshot of a session's counters and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current lifecycle state
    pub state: SessionState,

    /// When the session started, if it has
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since the session started
    pub duration_secs: f64,

    /// Frames encoded and handed to the socket
    pub frames_sent: u64,

    /// Frames produced while the transport was not ready, and discarded
    pub frames_dropped: u64,

    /// Inbound chunks scheduled for playback
    pub chunks_played: u64,

    /// Inbound chunks dropped by queue overflow
    pub chunks_dropped: u64,

    /// Inbound payloads that failed to decode and were dropped
    pub malformed_frames: u64,

    /// Consecutive reconnect attempts since the last successful connection
    pub reconnect_attempts: u32,
}
