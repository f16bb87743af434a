pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod reconnect;
pub mod session;
pub mod transport;
pub mod turn;

pub use audio::{
    AudioFrame, CaptureConfig, CapturePipeline, CaptureSource, FrameTap, NullSink, PlaybackConfig,
    PlaybackScheduler, PlaybackSink, SampleBlock, SyntheticSource, WavFileSource,
};
pub use config::Config;
pub use error::StreamError;
pub use reconnect::{ReconnectPolicy, ReconnectState};
pub use session::{PeerContext, SessionConfig, SessionEvent, SessionState, SessionStats, VoiceSession};
pub use transport::{
    ClientEvent, MediaPayload, ServerEvent, StartPayload, StreamTransport, TransportConfig,
    TransportSender, TransportUpdate,
};
pub use turn::{TurnConfig, TurnState, TurnTracker};
