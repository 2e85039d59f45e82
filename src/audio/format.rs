use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits per sample for every recording. Capture sources hand us 16-bit PCM.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Sample rate and channel layout of an interleaved 16-bit PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn mono(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1)
    }

    /// Bytes per interleaved frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * (BITS_PER_SAMPLE as usize / 8)
    }

    pub fn byte_rate(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_secs(&self, bytes: u64) -> f64 {
        let rate = self.byte_rate();
        if rate == 0 {
            return 0.0;
        }
        bytes as f64 / rate as f64
    }

    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Largest prefix of `len` bytes made of whole frames.
    pub fn aligned_len(&self, len: usize) -> usize {
        let align = self.block_align().max(1);
        len - len % align
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono(48000)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}
