//! WAV output for raw 16-bit little-endian PCM byte runs.
//!
//! `hound` writes the header up front and patches the chunk lengths on
//! `finalize`, so the backing stream must be seekable. Streams that cannot
//! seek are rejected with `PipelineError::NotSeekable` when the writer is
//! created, before any audio is accepted.

use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;
use tracing::{debug, warn};

use super::format::{AudioFormat, BITS_PER_SAMPLE};
use crate::error::{PipelineError, Result};

const BYTES_PER_SAMPLE: usize = BITS_PER_SAMPLE as usize / 8;

/// RIFF sizes are u32; the data chunk shares that space with the 36 header bytes after "RIFF".
const MAX_DATA_BYTES: u64 = u32::MAX as u64 - 36;

pub struct WaveWriter<W: Write + Seek> {
    writer: Option<hound::WavWriter<W>>,
    format: AudioFormat,
}

impl WaveWriter<BufWriter<File>> {
    /// Creates (or truncates) `path` and writes a provisional header.
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self> {
        let writer = hound::WavWriter::create(path, format.wav_spec())?;
        debug!("Opened WAV file {:?} ({})", path, format);

        Ok(Self {
            writer: Some(writer),
            format,
        })
    }
}

impl<W: Write + Seek> WaveWriter<W> {
    pub fn new(mut sink: W, format: AudioFormat) -> Result<Self> {
        sink.stream_position().map_err(PipelineError::from_seek)?;
        let writer = hound::WavWriter::new(sink, format.wav_spec())?;

        Ok(Self {
            writer: Some(writer),
            format,
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Sample bytes accepted so far (excluding the header).
    pub fn data_bytes(&self) -> u64 {
        self.writer
            .as_ref()
            .map_or(0, |w| u64::from(w.len()) * BYTES_PER_SAMPLE as u64)
    }

    /// Appends interleaved samples. `samples` must hold whole samples.
    pub fn write(&mut self, samples: &[u8]) -> Result<()> {
        if samples.len() % BYTES_PER_SAMPLE != 0 {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} bytes is not a whole number of samples", samples.len()),
            )));
        }
        if self.data_bytes() + samples.len() as u64 > MAX_DATA_BYTES {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::Other,
                "WAV data chunk would exceed 4 GiB",
            )));
        }

        let writer = self.writer.as_mut().ok_or_else(finalized_error)?;
        for pair in samples.chunks_exact(BYTES_PER_SAMPLE) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        Ok(())
    }

    /// Patches the RIFF and data lengths and closes the stream.
    pub fn finalize(mut self) -> Result<()> {
        let writer = self.writer.take().ok_or_else(finalized_error)?;
        writer.finalize()?;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for WaveWriter<W> {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}

fn finalized_error() -> PipelineError {
    PipelineError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "WAV writer already finalized",
    ))
}
