use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::codec::STREAM_SAMPLE_RATE;

/// Diagnostic tap that mirrors outbound frames to a WAV file.
///
/// Purely observational: the capture path hands it each frame it sends and
/// carries on regardless of write outcome.
pub struct FrameTap {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    frames: u64,
}

impl FrameTap {
    /// Create a tap file for the given stream under `dir`.
    pub fn create(dir: impl AsRef<Path>, stream_sid: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).context("Failed to create recording directory")?;

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let path = dir.join(format!("{}-{}.wav", stream_sid, stamp));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: STREAM_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create tap file: {:?}", path))?;

        info!("Recording outbound frames to {:?}", path);

        Ok(Self {
            writer: Some(writer),
            path,
            frames: 0,
        })
    }

    pub fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to tap file")?;
            }
            self.frames += 1;
        }
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize tap file")?;
        }
        Ok(self.path.clone())
    }
}

impl Drop for FrameTap {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize tap file on drop: {}", e);
            }
        }
    }
}
