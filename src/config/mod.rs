use crate::audio::AudioFormat;
use crate::capture::CaptureSettings;
use crate::conversion::{ConversionPreset, ConversionSettings};
use crate::error::PipelineError;
use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Re-apply the configuration at every session start, even if the host
    /// already did.
    pub reload_on_session_start: bool,
    pub recorder: RecorderConfig,
    pub converter: ConverterConfig,
    pub consent: ConsentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reload_on_session_start: true,
            recorder: RecorderConfig::default(),
            converter: ConverterConfig::default(),
            consent: ConsentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    /// Where session directories are created. Defaults to the data dir.
    pub root_directory_path: Option<PathBuf>,
    /// strftime pattern for session directory names
    pub session_name_format: String,
    /// strftime pattern appended to participant ids in file names
    pub file_timestamp_format: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes requested from the voice source per participant per tick
    pub read_buffer_size: usize,
    pub read_interval_ms: u64,
    /// Buffered bytes before a write hits the disk. Never below read_buffer_size.
    pub minimum_bytes_to_write: usize,
    /// Session directories to retain, the current one included (0 = keep all)
    pub keep_last_sessions: usize,
    /// Start a new file once the current one holds this many seconds
    pub rollover_after_secs: Option<u64>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_directory_path: None,
            session_name_format: "Session %Y-%m-%d %H.%M.%S".to_string(),
            file_timestamp_format: global::DEFAULT_TIMESTAMP_FORMAT.to_string(),
            sample_rate: 48000,
            channels: 1,
            read_buffer_size: 19200,
            read_interval_ms: 100,
            minimum_bytes_to_write: 96000,
            keep_last_sessions: 10,
            rollover_after_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub enabled: bool,
    /// Directory holding the ffmpeg binary. Falls back to PATH.
    pub ffmpeg_directory_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Output container, e.g. "mp3", "ogg"
    pub format: String,
    pub bitrate_kbps: u32,
    /// Passed as `-speed` when non-zero.
    pub speed: u8,
    /// Passed as `-preset` when set. Only some encoders accept it.
    pub preset: Option<ConversionPreset>,
    pub delete_after_conversion: bool,
    pub concurrent_limit: usize,
    pub interval_ms: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg_directory_path: None,
            sample_rate: 48000,
            channels: 1,
            format: "mp3".to_string(),
            bitrate_kbps: 128,
            speed: 0,
            preset: None,
            delete_after_conversion: true,
            concurrent_limit: 2,
            interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// When set, only participants on the allow-list are recorded.
    pub enforce: bool,
    /// TOML file with `allowed = ["id", ...]`
    pub allowlist_path: Option<PathBuf>,
}

impl RecorderConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    pub fn effective_min_bytes_to_write(&self) -> usize {
        self.minimum_bytes_to_write.max(self.read_buffer_size)
    }

    pub fn root_directory(&self) -> Result<PathBuf> {
        match &self.root_directory_path {
            Some(path) => Ok(path.clone()),
            None => global::recordings_dir(),
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            format: self.format(),
            read_buffer_size: self.read_buffer_size,
            poll_interval: Duration::from_millis(self.read_interval_ms),
            timestamp_format: self.file_timestamp_format.clone(),
            min_bytes_to_write: self.effective_min_bytes_to_write(),
            rollover_after: self.rollover_after_secs.map(Duration::from_secs),
        }
    }
}

impl ConverterConfig {
    pub fn conversion_settings(&self) -> ConversionSettings {
        ConversionSettings {
            target_format: AudioFormat::new(self.sample_rate, self.channels),
            container: self.format.clone(),
            bitrate_kbps: self.bitrate_kbps,
            speed: self.speed,
            preset: self.preset,
            delete_source_on_success: self.delete_after_conversion,
            concurrent_limit: self.concurrent_limit,
            poll_interval: Duration::from_millis(self.interval_ms),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        if config.recorder.minimum_bytes_to_write < config.recorder.read_buffer_size {
            warn!(
                "minimum_bytes_to_write ({}) is below read_buffer_size ({}), using {}",
                config.recorder.minimum_bytes_to_write,
                config.recorder.read_buffer_size,
                config.recorder.read_buffer_size
            );
        }

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let recorder = &self.recorder;
        let converter = &self.converter;

        let checks = [
            (recorder.sample_rate == 0, "recorder.sample_rate must be positive"),
            (recorder.channels == 0, "recorder.channels must be positive"),
            (recorder.read_buffer_size == 0, "recorder.read_buffer_size must be positive"),
            (recorder.read_interval_ms == 0, "recorder.read_interval_ms must be positive"),
            (
                recorder.rollover_after_secs == Some(0),
                "recorder.rollover_after_secs must be positive when set",
            ),
            (
                !global::is_valid_timestamp_format(&recorder.file_timestamp_format),
                "recorder.file_timestamp_format is not a valid strftime pattern",
            ),
            (
                !global::is_valid_timestamp_format(&recorder.session_name_format),
                "recorder.session_name_format is not a valid strftime pattern",
            ),
            (converter.sample_rate == 0, "converter.sample_rate must be positive"),
            (converter.channels == 0, "converter.channels must be positive"),
            (converter.concurrent_limit == 0, "converter.concurrent_limit must be positive"),
            (converter.interval_ms == 0, "converter.interval_ms must be positive"),
            (converter.bitrate_kbps == 0, "converter.bitrate_kbps must be positive"),
            (
                converter.format.trim().is_empty() || converter.format.contains(['/', '\\', '.']),
                "converter.format must be a bare container name",
            ),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(PipelineError::Configuration(message.to_string())),
            None => Ok(()),
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
