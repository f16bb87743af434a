use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::reconnect::ReconnectPolicy;
use crate::session::{PeerContext, SessionConfig};
use crate::transport::TransportConfig;
use crate::turn::TurnConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub stream: StreamSettings,
    pub audio: AudioSettings,
    pub reconnect: ReconnectSettings,
    pub recording: RecordingSettings,
}

#[derive(Debug, Deserialize)]
pub struct StreamSettings {
    pub url: String,
    pub account_sid: String,
    pub from: String,
    pub to: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct AudioSettings {
    pub native_sample_rate: u32,
    pub playback_lead_ms: u64,
    pub playback_queue_max: usize,
    pub voice_threshold: f32,
    pub hang_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub dir: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Assemble the session configuration this file describes.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transport: TransportConfig {
                url: self.stream.url.clone(),
                connect_timeout: Duration::from_secs(self.stream.connect_timeout_secs),
                bearer_token: None,
            },
            peer: PeerContext {
                account_sid: self.stream.account_sid.clone(),
                from: self.stream.from.clone(),
                to: self.stream.to.clone(),
                extra: serde_json::Value::Null,
            },
            capture: CaptureConfig {
                native_rate: self.audio.native_sample_rate,
            },
            playback: PlaybackConfig {
                lead_time: Duration::from_millis(self.audio.playback_lead_ms),
                max_queued: self.audio.playback_queue_max,
                ..Default::default()
            },
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
            },
            turn: TurnConfig {
                voice_threshold: self.audio.voice_threshold,
                hang_time: Duration::from_millis(self.audio.hang_ms),
                ..Default::default()
            },
            recording_dir: self
                .recording
                .enabled
                .then(|| PathBuf::from(&self.recording.dir)),
        }
    }
}
