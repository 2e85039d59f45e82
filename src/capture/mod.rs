//! Per-participant capture: identities, recorders and the dispatch loop.

pub mod dispatcher;
pub mod participant;
pub mod recorder;
pub mod status;

pub use dispatcher::{CaptureDispatcher, CaptureSettings, DispatcherState, SharedRecorder};
pub use participant::ParticipantId;
pub use recorder::{Recorder, RecorderSettings};
pub use status::{RecorderPhase, RecordingStatus};
