//! External encoder invocation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

use super::task::ConversionTask;
use crate::error::{PipelineError, Result};

#[cfg(windows)]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BINARY: &str = "ffmpeg";

/// Converts one finished recording into its target container.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Runs the conversion to completion and returns the output path.
    async fn convert(&self, task: &ConversionTask) -> Result<PathBuf>;

    fn name(&self) -> &str;
}

pub struct FfmpegEncoder {
    binary: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Looks for FFmpeg in `directory` first, then on `PATH`.
    pub fn locate(directory: Option<&Path>) -> Result<Self> {
        if let Some(dir) = directory {
            let candidate = dir.join(FFMPEG_BINARY);
            if candidate.is_file() {
                info!("Using FFmpeg at {:?}", candidate);
                return Ok(Self::new(candidate));
            }
            warn!(
                "FFmpeg wasn't found in {:?}, falling back to PATH lookup",
                dir
            );
        }

        match which::which(FFMPEG_BINARY) {
            Ok(path) => {
                info!("Using FFmpeg from PATH: {:?}", path);
                Ok(Self::new(path))
            }
            Err(e) => Err(PipelineError::EncoderNotFound(format!(
                "{} ({})",
                FFMPEG_BINARY, e
            ))),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    // -y: overwrite output without asking
    // -ar / -ac: resample and remix to the target format
    // -b:a: target bitrate
    // -preset / -speed: only when configured, most audio encoders reject them
    // -f: output container
    pub fn build_args(task: &ConversionTask) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            task.source_path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-ar".to_string(),
            task.target_format.sample_rate.to_string(),
            "-ac".to_string(),
            task.target_format.channels.to_string(),
            "-b:a".to_string(),
            format!("{}k", task.bitrate_kbps),
        ];

        if let Some(preset) = task.preset {
            args.push("-preset".to_string());
            args.push(preset.as_str().to_string());
        }
        if task.speed > 0 {
            args.push("-speed".to_string());
            args.push(task.speed.to_string());
        }

        args.push("-f".to_string());
        args.push(task.container.clone());
        args.push(task.output_path().to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn convert(&self, task: &ConversionTask) -> Result<PathBuf> {
        let output_path = task.output_path();
        let args = Self::build_args(task);
        debug!("Running {:?} {}", self.binary, args.join(" "));

        // Not kill_on_drop: a conversion that has started runs to completion.
        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PipelineError::EncoderNotFound(self.binary.to_string_lossy().to_string())
                } else {
                    PipelineError::EncoderFailure {
                        path: task.source_path.clone(),
                        reason: format!("failed to spawn encoder: {}", e),
                    }
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::EncoderFailure {
                path: task.source_path.clone(),
                reason: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        if !output_path.exists() {
            return Err(PipelineError::EncoderFailure {
                path: task.source_path.clone(),
                reason: "encoder did not produce an output file".to_string(),
            });
        }

        Ok(output_path)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
