//! Audio source abstraction for per-participant voice capture.

use anyhow::Result;
use async_trait::async_trait;

use super::format::AudioFormat;
use crate::capture::ParticipantId;

/// A run of interleaved 16-bit little-endian PCM read for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    pub format: AudioFormat,
    pub data: Vec<u8>,
}

impl SampleBuffer {
    pub fn new(format: AudioFormat, data: Vec<u8>) -> Self {
        Self { format, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Trait for the voice backend that the capture dispatcher polls.
///
/// Implemented by the host integration. Each call returns the audio that
/// became available for `participant` since the previous call, at most
/// `max_bytes` of it. `Ok(None)` (or an empty buffer) means nothing arrived
/// this tick and is not an error.
#[async_trait]
pub trait VoiceSource: Send + Sync {
    async fn read_available(
        &self,
        participant: &ParticipantId,
        max_bytes: usize,
    ) -> Result<Option<SampleBuffer>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
