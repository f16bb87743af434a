//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that owns:
//! - The capture pipeline (source → decimation → frames)
//! - The playback scheduler for inbound audio
//! - The session transport and its stream id
//! - Automatic reconnection with bounded backoff
//! - The turn/activity heuristic and observer events

mod config;
mod session;
mod state;
mod stats;

pub use config::{PeerContext, SessionConfig};
pub use session::VoiceSession;
pub use state::{SessionEvent, SessionState};
pub use stats::SessionStats;
