//! Fixed-size PCM frame codec
//!
//! The wire unit is one 10 ms block of 8 kHz mono audio: 80 signed 16-bit
//! little-endian samples, 160 bytes, carried as standard base64 text. Encoding
//! and decoding are pure and stateless; everything stateful (framing,
//! scheduling) lives in the capture and playback pipelines.

use base64::Engine;

use crate::error::StreamError;

/// Samples per frame (10 ms at the stream rate).
pub const FRAME_SAMPLES: usize = 80;

/// Bytes per frame before transport encoding.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Fixed sample rate of the stream, in Hz.
pub const STREAM_SAMPLE_RATE: u32 = 8_000;

/// Encode PCM samples to the transport-safe payload text.
pub fn encode(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a payload back to PCM samples.
///
/// Rejects invalid base64 and any decoded byte length that is zero or odd
/// with [`StreamError::MalformedFrame`]; never panics on peer input.
pub fn decode(payload: &str) -> Result<Vec<i16>, StreamError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| StreamError::MalformedFrame(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return Err(StreamError::MalformedFrame(format!(
            "payload is {} bytes, expected a positive multiple of 2",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

/// Convert float samples in [-1, 1] to i16, saturating out-of-range input.
pub fn from_f32(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Convert i16 samples to the playback float range [-1, 1].
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}
