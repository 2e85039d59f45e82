use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::AudioFormat;

/// Encoder speed/quality trade-off, passed through as `-preset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionPreset {
    UltraFast,
    SuperFast,
    VeryFast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    VerySlow,
}

impl ConversionPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UltraFast => "ultrafast",
            Self::SuperFast => "superfast",
            Self::VeryFast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::VerySlow => "veryslow",
        }
    }
}

impl Default for ConversionPreset {
    fn default() -> Self {
        Self::UltraFast
    }
}

/// One finished recording waiting to be transcoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub source_path: PathBuf,
    pub target_format: AudioFormat,
    /// Output container, also used as the output file extension.
    pub container: String,
    pub bitrate_kbps: u32,
    pub speed: u8,
    pub preset: Option<ConversionPreset>,
    pub delete_source_on_success: bool,
}

impl ConversionTask {
    /// Same directory and stem as the source, target container as extension.
    pub fn output_path(&self) -> PathBuf {
        self.source_path.with_extension(&self.container)
    }
}

/// Queue-wide conversion parameters, snapshotted from config when the
/// queue is built.
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub target_format: AudioFormat,
    pub container: String,
    pub bitrate_kbps: u32,
    pub speed: u8,
    pub preset: Option<ConversionPreset>,
    pub delete_source_on_success: bool,
    pub concurrent_limit: usize,
    pub poll_interval: Duration,
}

impl ConversionSettings {
    pub fn task_for(&self, source_path: &Path) -> ConversionTask {
        ConversionTask {
            source_path: source_path.to_path_buf(),
            target_format: self.target_format,
            container: self.container.clone(),
            bitrate_kbps: self.bitrate_kbps,
            speed: self.speed,
            preset: self.preset,
            delete_source_on_success: self.delete_source_on_success,
        }
    }
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            target_format: AudioFormat::mono(48000),
            container: "mp3".to_string(),
            bitrate_kbps: 128,
            speed: 0,
            preset: None,
            delete_source_on_success: true,
            concurrent_limit: 2,
            poll_interval: Duration::from_secs(1),
        }
    }
}
