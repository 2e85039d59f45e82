//! Per-participant recording state machine.
//!
//! Incoming sample bytes are batched in memory and written to the current
//! WAV file once at least `min_bytes_to_write` have accumulated. A reset
//! closes the current file (flushing whatever is buffered), hands it to the
//! converter and opens the next one. Dispose does the same without opening a
//! new file and is idempotent.

use chrono::{DateTime, Local, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::participant::ParticipantId;
use super::status::{RecorderPhase, RecordingStatus};
use crate::audio::{AudioFormat, WaveWriter};
use crate::conversion::ConversionQueue;
use crate::error::{PipelineError, Result};
use crate::global;

const FILE_EXTENSION: &str = "wav";
const MAX_NAME_SUFFIX: u32 = 1000;

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// Directory the recording files are created in (the session directory).
    pub root_directory: PathBuf,
    /// strftime pattern for the timestamp part of file names.
    pub timestamp_format: String,
    /// Buffered bytes required before a write reaches the file.
    pub min_bytes_to_write: usize,
    /// Roll over to a new file once the current one holds this much audio.
    pub rollover_after: Option<Duration>,
}

pub struct Recorder {
    participant: ParticipantId,
    format: AudioFormat,
    settings: RecorderSettings,
    buffer: Vec<u8>,
    writer: Option<WaveWriter<BufWriter<File>>>,
    current_path: PathBuf,
    started_at: DateTime<Utc>,
    converter: Option<ConversionQueue>,
    phase: RecorderPhase,
    flushes: u64,
    finished_files: Vec<PathBuf>,
    last_error: Option<String>,
}

impl Recorder {
    pub fn new(
        participant: ParticipantId,
        format: AudioFormat,
        settings: RecorderSettings,
        converter: Option<ConversionQueue>,
    ) -> Result<Self> {
        fs::create_dir_all(&settings.root_directory)?;

        let mut recorder = Self {
            participant,
            format,
            settings,
            buffer: Vec::new(),
            writer: None,
            current_path: PathBuf::new(),
            started_at: Utc::now(),
            converter,
            phase: RecorderPhase::Recording,
            flushes: 0,
            finished_files: Vec::new(),
            last_error: None,
        };
        recorder.open_next_file()?;

        info!(
            "Recording {} ({}) to {:?}",
            recorder.participant, recorder.format, recorder.current_path
        );

        Ok(recorder)
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Session directory this recorder writes into.
    pub fn root_directory(&self) -> &Path {
        &self.settings.root_directory
    }

    pub fn phase(&self) -> RecorderPhase {
        self.phase
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == RecorderPhase::Disposed
    }

    /// Number of times buffered bytes were handed to the WAV writer.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Files this recorder has closed, oldest first.
    pub fn finished_files(&self) -> &[PathBuf] {
        &self.finished_files
    }

    pub fn set_converter(&mut self, converter: Option<ConversionQueue>) {
        self.converter = converter;
    }

    /// Buffers `samples`, writing through to the file once the threshold is
    /// reached. Rolls over to a new file when the configured duration is hit.
    pub fn write(&mut self, samples: &[u8]) -> Result<()> {
        self.ensure_active()?;

        self.buffer.extend_from_slice(samples);
        if self.buffer.len() >= self.settings.min_bytes_to_write {
            self.flush_buffer()?;
        }

        if self.rollover_due() {
            debug!("Rolling over recording for {}", self.participant);
            self.reset(None)?;
        }

        Ok(())
    }

    /// Like `write`, but refuses to start once `cancel` has fired.
    pub fn write_until(&mut self, samples: &[u8], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        self.write(samples)
    }

    /// Closes the current file and starts a new one, optionally in a new
    /// format. Returns the path of the file that was closed.
    pub fn reset(&mut self, format: Option<AudioFormat>) -> Result<Option<PathBuf>> {
        self.ensure_active()?;

        let finished = self.close_current()?;
        if let Some(format) = format {
            if format != self.format {
                info!(
                    "Audio format for {} changed: {} -> {}",
                    self.participant, self.format, format
                );
            }
            self.format = format;
        }
        self.open_next_file()?;

        Ok(finished)
    }

    /// Flushes everything still buffered, finalizes the file and queues it
    /// for conversion. A second call does nothing.
    pub fn dispose(&mut self) -> Result<Option<PathBuf>> {
        if self.is_disposed() {
            return Ok(None);
        }
        self.phase = RecorderPhase::Disposed;

        let finished = self.close_current()?;
        info!("Stopped recording {}", self.participant);
        Ok(finished)
    }

    /// Marks the recording as abandoned after an unrecoverable error.
    pub fn mark_failed(&mut self, reason: String) {
        if !self.is_disposed() {
            self.phase = RecorderPhase::Failed;
        }
        self.last_error = Some(reason);
    }

    pub fn status(&self) -> RecordingStatus {
        let bytes_written = self.writer.as_ref().map_or(0, |w| w.data_bytes());
        let file_size = fs::metadata(&self.current_path).ok().map(|m| m.len());

        RecordingStatus {
            participant: self.participant.clone(),
            phase: self.phase,
            path: self.current_path.clone(),
            format: self.format,
            started_at: self.started_at,
            duration_secs: self
                .format
                .duration_secs(bytes_written + self.buffer.len() as u64),
            bytes_written,
            buffered_bytes: self.buffer.len(),
            file_size,
            files_finished: self.finished_files.len(),
            last_error: self.last_error.clone(),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.phase {
            RecorderPhase::Disposed => Err(PipelineError::Disposed(self.participant.clone())),
            _ => Ok(()),
        }
    }

    fn rollover_due(&self) -> bool {
        match (self.settings.rollover_after, self.writer.as_ref()) {
            (Some(limit), Some(writer)) => {
                self.format.duration_secs(writer.data_bytes()) >= limit.as_secs_f64()
            }
            _ => false,
        }
    }

    /// Writes every whole frame in the buffer. A trailing partial frame stays
    /// buffered until the rest of it arrives.
    fn flush_buffer(&mut self) -> Result<()> {
        let len = self.format.aligned_len(self.buffer.len());
        if len == 0 {
            return Ok(());
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(PipelineError::Disposed(self.participant.clone()));
        };
        writer.write(&self.buffer[..len])?;
        self.buffer.drain(..len);
        self.flushes += 1;
        Ok(())
    }

    fn close_current(&mut self) -> Result<Option<PathBuf>> {
        let flushed = self.flush_buffer();

        if !self.buffer.is_empty() {
            match &flushed {
                Ok(()) => warn!(
                    "Discarding {} bytes of incomplete frame for {}",
                    self.buffer.len(),
                    self.participant
                ),
                Err(e) => warn!(
                    "Dropping {} buffered bytes for {} after failed write: {}",
                    self.buffer.len(),
                    self.participant,
                    e
                ),
            }
            self.buffer.clear();
        }

        let Some(writer) = self.writer.take() else {
            return flushed.map(|_| None);
        };

        let data_bytes = writer.data_bytes();
        let finalized = writer.finalize();
        flushed?;
        finalized?;

        let path = self.current_path.clone();
        info!(
            "Finished recording {:?} ({:.1}s, {} bytes)",
            path,
            self.format.duration_secs(data_bytes),
            data_bytes
        );
        self.finished_files.push(path.clone());

        match &self.converter {
            Some(converter) if data_bytes > 0 => {
                converter.enqueue_file(&path);
            }
            Some(_) => debug!("Skipping conversion of empty recording {:?}", path),
            None => {}
        }

        Ok(Some(path))
    }

    fn open_next_file(&mut self) -> Result<()> {
        let now = Local::now();
        let path = self.next_file_path(&now)?;

        self.writer = Some(WaveWriter::create(&path, self.format)?);
        self.current_path = path;
        self.started_at = now.with_timezone(&Utc);
        self.buffer.clear();
        Ok(())
    }

    fn next_file_path(&self, now: &DateTime<Local>) -> Result<PathBuf> {
        let stem = format!(
            "{}_{}",
            self.participant.file_stem(),
            global::format_timestamp(now, &self.settings.timestamp_format)
        );
        let dir = &self.settings.root_directory;
        let path = dir.join(format!("{}.{}", stem, FILE_EXTENSION));
        if !path.exists() {
            return Ok(path);
        }

        // Handle collision by appending counter
        for i in 1..MAX_NAME_SUFFIX {
            let alt_path = dir.join(format!("{}_{}.{}", stem, i, FILE_EXTENSION));
            if !alt_path.exists() {
                return Ok(alt_path);
            }
        }

        Err(PipelineError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for {:?} in {:?}", stem, dir),
        )))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if !self.is_disposed() {
            debug!("Dropping active recorder for {}, disposing", self.participant);
            if let Err(e) = self.dispose() {
                warn!("Failed to dispose recorder for {}: {}", self.participant, e);
            }
        }
    }
}
