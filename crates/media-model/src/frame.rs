//! Decoded media handed between pipeline stages.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Bytes per RGBA pixel.
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

/// One decoded video frame in tightly packed RGBA.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Presentation time relative to the start of the source.
    pub pts: Duration,
    pub data: Bytes,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, pts: Duration, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            pts,
            data: data.into(),
        }
    }

    /// Byte length a packed RGBA frame of this size must have.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * RGBA_BYTES_PER_PIXEL
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == Self::expected_len(self.width, self.height)
    }
}

/// Sample layout of relayed audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// A fully decoded audio track held in memory.
///
/// Samples are interleaved `f32` in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub spec: AudioSpec,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn new(spec: AudioSpec, samples: Vec<f32>) -> Self {
        Self { spec, samples }
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        match self.spec.channels {
            0 => 0,
            channels => self.samples.len() / channels as usize,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.spec.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.spec.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_shape_check() {
        let frame = VideoFrame::new(4, 2, Duration::ZERO, vec![0u8; 32]);
        assert!(frame.is_well_formed());
        let short = VideoFrame::new(4, 2, Duration::ZERO, vec![0u8; 31]);
        assert!(!short.is_well_formed());
    }

    #[test]
    fn audio_duration_from_frames() {
        let buffer = AudioBuffer::new(AudioSpec::default(), vec![0.0; 48000 * 2 * 3]);
        assert_eq!(buffer.frames(), 144_000);
        assert_eq!(buffer.duration(), Duration::from_secs(3));
    }

    #[test]
    fn zero_channel_audio_is_empty() {
        let buffer = AudioBuffer::new(
            AudioSpec {
                sample_rate: 48000,
                channels: 0,
            },
            vec![0.0; 10],
        );
        assert!(buffer.is_empty());
    }
}
