//! Read-only status projection over active recorders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::participant::ParticipantId;
use crate::audio::AudioFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderPhase {
    Recording,
    Failed,
    Disposed,
}

impl RecorderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        }
    }
}

/// Snapshot of a single participant's recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub participant: ParticipantId,
    pub phase: RecorderPhase,
    pub path: PathBuf,
    pub format: AudioFormat,
    pub started_at: DateTime<Utc>,
    /// Audio length of the current file, buffered bytes included.
    pub duration_secs: f64,
    /// Sample bytes already flushed to the current file.
    pub bytes_written: u64,
    pub buffered_bytes: usize,
    /// On-disk size of the current file, header included.
    pub file_size: Option<u64>,
    pub files_finished: usize,
    pub last_error: Option<String>,
}

impl RecordingStatus {
    pub fn size_megabytes(&self) -> f64 {
        self.file_size.unwrap_or(0) as f64 / (1024.0 * 1024.0)
    }
}
