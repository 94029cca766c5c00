//! Raw PCM frames exchanged with the remote endpoint
//!
//! Wire format is mono signed 16-bit little-endian samples with no header.
//! Capture frames are 16kHz, playback frames are 24kHz.

use tracing::warn;

/// Sample rate of outbound (microphone) frames
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Sample rate of inbound (synthesized speech) frames
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per outbound frame (8192 bytes on the wire)
pub const CAPTURE_WINDOW_SAMPLES: usize = 4096;

/// Convert a normalized sample to 16-bit PCM
///
/// Clamps to [-1, 1] and scales by 32767, truncating toward zero.
pub fn quantize_sample(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert a 16-bit PCM sample to a normalized float by linear scaling
pub fn dequantize_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// One immutable frame of mono 16-bit PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    sequence: u64,
}

impl PcmFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
        }
    }

    /// Quantize a window of normalized samples
    pub fn from_normalized(samples: &[f32], sample_rate: u32, sequence: u64) -> Self {
        Self::new(
            samples.iter().map(|&s| quantize_sample(s)).collect(),
            sample_rate,
            sequence,
        )
    }

    /// Decode a little-endian wire payload
    ///
    /// A trailing odd byte cannot form a sample and is discarded.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, sequence: u64) -> Self {
        if bytes.len() % 2 != 0 {
            warn!(
                "Frame {} has odd payload length {}, dropping trailing byte",
                sequence,
                bytes.len()
            );
        }

        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Self::new(samples, sample_rate, sequence)
    }

    /// Encode as a little-endian wire payload
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Decode to the output device's normalized float representation
    pub fn to_normalized(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| dequantize_sample(s)).collect()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Exact playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}
