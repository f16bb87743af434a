use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// A block of float samples in [-1, 1] at the source's native sample rate.
pub type SampleBlock = Vec<f32>;

/// Audio capture source trait
///
/// A source pushes raw sample blocks at its native rate into a channel; the
/// capture pipeline downsamples and frames them. Platform microphone backends
/// implement this trait; acquiring a device may fail with
/// [`crate::StreamError::PermissionDenied`].
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive sample blocks
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if source is currently capturing
    fn is_capturing(&self) -> bool;

    /// Native sample rate of the captured audio, in Hz
    fn sample_rate(&self) -> u32;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Capture source that streams a WAV file as if it were a live microphone.
///
/// Samples are converted to mono f32 and emitted in fixed blocks, paced in
/// real time so downstream timing behaves as it would with a device.
pub struct WavFileSource {
    path: PathBuf,
    sample_rate: u32,
    block_ms: u64,
    paced: bool,
    capturing: Arc<AtomicBool>,
}

impl WavFileSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let reader = hound::WavReader::open(&path)
            .with_context(|| format!("Failed to open WAV file: {:?}", path))?;
        let spec = reader.spec();

        Ok(Self {
            path,
            sample_rate: spec.sample_rate,
            block_ms: 20,
            paced: true,
            capturing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Disable real-time pacing; emits the whole file as fast as possible.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn read_mono_f32(&self) -> Result<Vec<f32>> {
        let mut reader = hound::WavReader::open(&self.path)
            .with_context(|| format!("Failed to open WAV file: {:?}", self.path))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()
                    .context("Failed to read WAV samples")?
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .context("Failed to read WAV samples")?,
        };

        if channels <= 1 {
            return Ok(interleaved);
        }

        // Average channels down to mono
        Ok(interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect())
    }
}

#[async_trait::async_trait]
impl CaptureSource for WavFileSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>> {
        let samples = self.read_mono_f32()?;
        let block_len = (self.sample_rate as u64 * self.block_ms / 1000) as usize;
        let block_interval = Duration::from_millis(self.block_ms);
        let paced = self.paced;
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        info!(
            "WAV source started: {:?} ({} Hz, {} samples)",
            self.path,
            self.sample_rate,
            samples.len()
        );

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(block_interval);
            for block in samples.chunks(block_len.max(1)) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if paced {
                    interval.tick().await;
                }
                if tx.send(block.to_vec()).await.is_err() {
                    break;
                }
            }
            capturing.store(false, Ordering::SeqCst);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Synthetic tone source for tests and local runs without a device.
pub struct SyntheticSource {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    duration: Duration,
    paced: bool,
    capturing: Arc<AtomicBool>,
}

impl SyntheticSource {
    pub fn new(sample_rate: u32, frequency: f32, duration: Duration) -> Self {
        Self {
            sample_rate,
            frequency,
            amplitude: 0.5,
            duration,
            paced: true,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Disable real-time pacing; emits all blocks back to back.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl CaptureSource for SyntheticSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>> {
        let rate = self.sample_rate;
        let total = (rate as f64 * self.duration.as_secs_f64()) as usize;
        let block_len = (rate / 50).max(1) as usize; // 20 ms blocks
        let step = std::f32::consts::TAU * self.frequency / rate as f32;
        let amplitude = self.amplitude;
        let paced = self.paced;
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(20));
            let mut emitted = 0usize;
            while emitted < total {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                if paced {
                    interval.tick().await;
                }
                let len = block_len.min(total - emitted);
                let block: Vec<f32> = (emitted..emitted + len)
                    .map(|i| (i as f32 * step).sin() * amplitude)
                    .collect();
                emitted += len;
                if tx.send(block).await.is_err() {
                    break;
                }
            }
            capturing.store(false, Ordering::SeqCst);
        });

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}
