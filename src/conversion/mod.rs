//! Post-hoc conversion of finished recordings through an external encoder.

pub mod encoder;
pub mod queue;
pub mod task;

pub use encoder::{Encoder, FfmpegEncoder};
pub use queue::{ConversionQueue, ConversionStats, FailedConversion};
pub use task::{ConversionPreset, ConversionSettings, ConversionTask};
