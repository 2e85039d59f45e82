//! Error taxonomy shared by the capture, conversion and retention components.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::capture::ParticipantId;

/// ESPIPE: the descriptor refers to a pipe, socket or FIFO.
const ESPIPE: i32 = 29;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backing stream is not seekable, WAV header cannot be finalized")]
    NotSeekable,

    #[error("WAV encoding error: {0}")]
    Wav(String),

    #[error("Encoder failed for {path:?}: {reason}")]
    EncoderFailure { path: PathBuf, reason: String },

    #[error("Encoder binary not found: {0}")]
    EncoderNotFound(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Recorder for {0} has already been disposed")]
    Disposed(ParticipantId),
}

impl PipelineError {
    /// Classifies a seek failure, keeping genuine I/O errors distinct from
    /// streams that cannot seek at all.
    pub fn from_seek(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Unsupported || err.raw_os_error() == Some(ESPIPE) {
            PipelineError::NotSeekable
        } else {
            PipelineError::Io(err)
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::Configuration(_) | PipelineError::EncoderNotFound(_)
        )
    }
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => PipelineError::from_seek(e),
            other => PipelineError::Wav(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_unsupported_maps_to_not_seekable() {
        let err = io::Error::new(io::ErrorKind::Unsupported, "pipe");
        assert!(matches!(
            PipelineError::from_seek(err),
            PipelineError::NotSeekable
        ));

        let err = io::Error::from_raw_os_error(ESPIPE);
        assert!(matches!(
            PipelineError::from_seek(err),
            PipelineError::NotSeekable
        ));
    }

    #[test]
    fn test_hound_errors_keep_io_cause() {
        let err = hound::Error::IoError(io::Error::new(io::ErrorKind::Unsupported, "pipe"));
        assert!(matches!(PipelineError::from(err), PipelineError::NotSeekable));

        let err = hound::Error::IoError(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert!(matches!(PipelineError::from(err), PipelineError::Io(_)));

        assert!(matches!(
            PipelineError::from(hound::Error::Unsupported),
            PipelineError::Wav(_)
        ));
    }

    #[test]
    fn test_other_seek_errors_stay_io() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(PipelineError::from_seek(err), PipelineError::Io(_)));
    }

    #[test]
    fn test_configuration_classification() {
        assert!(PipelineError::EncoderNotFound("ffmpeg".into()).is_configuration());
        assert!(PipelineError::Configuration("bad".into()).is_configuration());
        assert!(!PipelineError::Cancelled.is_configuration());
    }
}
