//! Pipeline-wide status snapshot.

use serde::Serialize;
use std::path::PathBuf;

use crate::capture::RecordingStatus;
use crate::conversion::{ConversionStats, FailedConversion};

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub session_name: String,
    pub session_directory: PathBuf,
    pub capturing: bool,
    pub recordings: Vec<RecordingStatus>,
    /// `None` while conversion is disabled.
    pub conversion: Option<ConversionStats>,
    pub failed_conversions: Vec<FailedConversion>,
    pub retained_sessions: usize,
}

impl PipelineStatus {
    pub fn total_recorded_bytes(&self) -> u64 {
        self.recordings.iter().map(|r| r.bytes_written).sum()
    }
}
