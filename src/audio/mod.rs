pub mod capture;
pub mod playback;
pub mod recorder;
pub mod source;

pub use capture::{AudioFrame, CaptureConfig, CapturePipeline, CaptureStats};
pub use playback::{
    chunk_duration, NullSink, PlaybackChunk, PlaybackConfig, PlaybackScheduler, PlaybackSink,
};
pub use recorder::FrameTap;
pub use source::{CaptureSource, SampleBlock, SyntheticSource, WavFileSource};
