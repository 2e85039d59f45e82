pub mod format;
pub mod source;
pub mod wave_writer;

pub use format::AudioFormat;
pub use source::{SampleBuffer, VoiceSource};
pub use wave_writer::WaveWriter;
