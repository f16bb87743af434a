use crate::codec::{FRAME_SAMPLES, STREAM_SAMPLE_RATE};

/// One outbound audio frame: exactly [`FRAME_SAMPLES`] samples of 8 kHz mono
/// PCM, produced by the capture pipeline and consumed once by the codec.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

/// Capture pipeline configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Native sample rate of the capture source (will decimate to 8 kHz)
    pub native_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { native_rate: 48_000 }
    }
}

/// Counters for capture-side diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    /// Frames produced by the framer
    pub frames_produced: u64,
}

/// Turns raw sample blocks at the source's native rate into a steady
/// sequence of fixed-size 8 kHz frames.
///
/// Downsampling is nearest-neighbor decimation: a fractional accumulator
/// advances by one per native sample and a sample is retained each time it
/// crosses `native_rate / 8000`. No anti-alias filtering; aliasing is an
/// accepted tradeoff for latency and simplicity.
pub struct CapturePipeline {
    ratio: f64,
    counter: f64,
    pending: Vec<i16>,
    level: f32,
    stats: CaptureStats,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig) -> Self {
        let native = config.native_rate.max(STREAM_SAMPLE_RATE);
        Self {
            ratio: native as f64 / STREAM_SAMPLE_RATE as f64,
            counter: 0.0,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
            level: 0.0,
            stats: CaptureStats::default(),
        }
    }

    /// Feed one block of native-rate samples; returns every complete frame
    /// it produced. Never blocks and never buffers beyond one partial frame.
    pub fn submit(&mut self, block: &[f32]) -> Vec<AudioFrame> {
        let mut peak = 0.0f32;

        for &sample in block {
            peak = peak.max(sample.abs());

            self.counter += 1.0;
            if self.counter < self.ratio {
                continue;
            }
            // Carry the fractional remainder so non-integer ratios hold the
            // long-run rate.
            self.counter -= self.ratio;

            let value = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            self.pending.push(value);
        }

        self.level = peak;

        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_SAMPLES {
            let rest = self.pending.split_off(FRAME_SAMPLES);
            let samples = std::mem::replace(&mut self.pending, rest);
            self.stats.frames_produced += 1;
            frames.push(AudioFrame { samples });
        }
        frames
    }

    /// Peak magnitude of the most recent submitted block, in [0, 1].
    ///
    /// Computed whether or not frames are actually sent; this is the signal
    /// the turn heuristic observes.
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }
}
