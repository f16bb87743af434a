use anyhow::Result;
use std::path::PathBuf;

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{encode_extra_data, StartPayload, TransportConfig};
use crate::turn::TurnConfig;

/// Identifying metadata sent once at stream start. Immutable for the
/// session's lifetime.
#[derive(Debug, Clone)]
pub struct PeerContext {
    pub account_sid: String,
    /// Caller identity
    pub from: String,
    /// Target identity
    pub to: String,
    /// Free-form correlation payload, carried base64-encoded in `start`
    pub extra: serde_json::Value,
}

impl Default for PeerContext {
    fn default() -> Self {
        Self {
            account_sid: "local-dev".to_string(),
            from: "unknown".to_string(),
            to: "unknown".to_string(),
            extra: serde_json::Value::Null,
        }
    }
}

impl PeerContext {
    /// Build the `start` payload for a connection attempt.
    pub fn start_payload(&self, stream_sid: &str) -> Result<StartPayload> {
        Ok(StartPayload {
            account_sid: self.account_sid.clone(),
            stream_sid: stream_sid.to_string(),
            from: self.from.clone(),
            to: self.to.clone(),
            extra_data: encode_extra_data(&self.extra)?,
        })
    }
}

/// Configuration for a voice streaming session
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Socket endpoint and connect timeout
    pub transport: TransportConfig,

    /// Identity metadata for the `start` message
    pub peer: PeerContext,

    /// Capture pipeline settings (native rate of the source)
    pub capture: CaptureConfig,

    /// Playback scheduler settings (queue cap, lookahead)
    pub playback: PlaybackConfig,

    /// Automatic reconnection backoff
    pub reconnect: ReconnectPolicy,

    /// Turn heuristic thresholds
    pub turn: TurnConfig,

    /// When set, outbound frames are mirrored to a WAV file in this
    /// directory for diagnostics
    pub recording_dir: Option<PathBuf>,
}
