use std::time::Duration;
use thiserror::Error;

/// Errors produced by the streaming core.
///
/// Codec and frame-level failures are recovered locally (drop and continue).
/// Connection-level failures feed the reconnection controller and become
/// state transitions, never panics. Only `PermissionDenied` and
/// `ReconnectExhausted` surface to the caller as terminal failures.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Audio capture device access was refused. Fatal to starting capture.
    #[error("audio capture permission denied: {0}")]
    PermissionDenied(String),

    /// An inbound media payload could not be decoded. The frame is dropped.
    #[error("malformed media frame: {0}")]
    MalformedFrame(String),

    /// The socket did not open within the configured bound.
    #[error("connection attempt timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The socket failed to connect or errored mid-stream.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The peer closed the connection with a non-normal close code.
    #[error("connection closed abnormally: {0}")]
    AbnormalClose(String),

    /// Automatic reconnection gave up; a manual reconnect is required.
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    /// The socket was not open when a frame was emitted. The frame is dropped.
    #[error("socket not open, frame dropped")]
    SendFailure,
}
