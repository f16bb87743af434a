use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::turn::TurnState;

/// Authoritative session lifecycle state.
///
/// Mutated only by the session itself (transport and reconnection handling);
/// every other component observes read-only snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    /// Capture is armed and frames are flowing; connection alone is not
    /// streaming
    Streaming,
    Disconnected,
    Reconnecting,
    /// Reconnection exhausted; requires a manual reconnect
    Failed,
}

/// Observer events for the UI shell.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    State(SessionState),
    Turn(TurnState),
    /// An automatic reconnect attempt was scheduled
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Recoverable degradation (e.g. playback queue overflow)
    Degraded(String),
    /// Non-fatal error notification from the peer
    ProtocolError(String),
    /// Terminal failure requiring user action
    Terminal(String),
}
