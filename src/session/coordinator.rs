//! Session lifecycle orchestration.
//!
//! The coordinator owns every piece of per-pipeline state: the config
//! snapshot, the root cancellation token, the capture dispatcher, the
//! conversion queue and the retention queue. Hosts drive it by calling the
//! `on_*` methods at session boundaries:
//!
//! on_session_start → on_config_reloaded → participants join/leave →
//! on_session_end → on_session_restart → on_session_start ...

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::compliance::ComplianceGate;
use super::host::SessionHost;
use super::status::PipelineStatus;
use crate::audio::VoiceSource;
use crate::capture::{CaptureDispatcher, DispatcherState, ParticipantId};
use crate::config::Config;
use crate::conversion::{ConversionQueue, Encoder, FfmpegEncoder};
use crate::global;
use crate::retention::RetentionManager;

struct ActiveConverter {
    queue: ConversionQueue,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
}

impl ActiveConverter {
    async fn shut_down(self) {
        self.cancel.cancel();
        if let Err(e) = self.poller.await {
            error!("Conversion poller terminated abnormally: {}", e);
        }
        self.queue.wait_for_in_flight().await;
    }
}

pub struct SessionCoordinator {
    config: Config,
    host: Arc<dyn SessionHost>,
    source: Arc<dyn VoiceSource>,
    gate: Arc<dyn ComplianceGate>,
    encoder: Option<Arc<dyn Encoder>>,
    cancel: CancellationToken,
    capture: Option<CaptureDispatcher>,
    converter: Option<ActiveConverter>,
    retention: RetentionManager,
    root_directory: PathBuf,
    session_name: String,
}

impl SessionCoordinator {
    pub fn new(
        config: Config,
        host: Arc<dyn SessionHost>,
        source: Arc<dyn VoiceSource>,
        gate: Arc<dyn ComplianceGate>,
    ) -> Result<Self> {
        config.validate()?;

        let root_directory = config.recorder.root_directory()?;
        let retention = RetentionManager::scan(&root_directory)
            .with_context(|| format!("Failed to scan recording root {:?}", root_directory))?;
        let session_name = session_name_for(&config);

        info!(
            "Pipeline ready (root: {:?}, {} retained sessions)",
            root_directory,
            retention.len()
        );

        Ok(Self {
            config,
            host,
            source,
            gate,
            encoder: None,
            cancel: CancellationToken::new(),
            capture: None,
            converter: None,
            retention,
            root_directory,
            session_name,
        })
    }

    /// Uses `encoder` for conversions instead of locating FFmpeg.
    pub fn with_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn session_directory(&self) -> PathBuf {
        self.root_directory.join(&self.session_name)
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn capture(&self) -> Option<&CaptureDispatcher> {
        self.capture.as_ref()
    }

    pub fn converter(&self) -> Option<&ConversionQueue> {
        self.converter.as_ref().map(|c| &c.queue)
    }

    pub fn retention(&self) -> &RetentionManager {
        &self.retention
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Swaps in a new configuration and re-applies it.
    pub async fn apply_config(&mut self, config: Config) -> Result<()> {
        config.validate()?;

        let root_directory = config.recorder.root_directory()?;
        if root_directory != self.root_directory {
            info!("Recording root changed to {:?}", root_directory);
            self.retention = RetentionManager::scan(&root_directory)?;
            self.root_directory = root_directory;
        }

        self.config = config;
        self.on_config_reloaded().await
    }

    /// Brings the conversion queue and capture dispatcher in line with the
    /// enabled flags and re-evaluates consent for every participant.
    pub async fn on_config_reloaded(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!("Ignoring reload after shutdown");
            return Ok(());
        }

        if let Err(e) = self.gate.reload().await {
            warn!("Failed to reload consent gate: {:#}", e);
        }

        self.reconcile_converter().await;
        self.reconcile_capture().await?;
        Ok(())
    }

    /// Seeds the session name, rotates retention and, if configured,
    /// reloads the pipeline. Recordings still open from the previous session
    /// are finalized first so rotation only ever removes closed sessions.
    pub async fn on_session_start(&mut self) -> Result<()> {
        let previous_directory = self.session_directory();
        self.session_name = session_name_for(&self.config);
        info!("Session started: {}", self.session_name);

        if self.session_directory() != previous_directory {
            if let Some(capture) = &self.capture {
                let finalized = capture.clear().await;
                if finalized > 0 {
                    info!("Finalized {} recordings from the previous session", finalized);
                }
            }
        }

        if self.config.recorder.enabled {
            let session_directory = self.session_directory();
            let removed = self
                .retention
                .rotate(self.config.recorder.keep_last_sessions, session_directory);
            if !removed.is_empty() {
                info!("Pruned {} old session directories", removed.len());
            }
        }

        if self.config.reload_on_session_start {
            self.on_config_reloaded().await?;
        }
        Ok(())
    }

    /// Finalizes every recording but keeps the dispatcher and queue running.
    pub async fn on_session_restart(&mut self) -> usize {
        match &self.capture {
            Some(capture) => {
                let disposed = capture.clear().await;
                info!("Session restarting, finalized {} recordings", disposed);
                disposed
            }
            None => 0,
        }
    }

    /// Recordings are finalized on unregister or reset, so nothing happens here.
    pub fn on_session_end(&self) {
        debug!("Session {} ended", self.session_name);
    }

    /// Starts recording `participant` if capture is on and they are eligible.
    pub async fn on_participant_joined(&mut self, participant: ParticipantId) -> Result<bool> {
        let Some(capture) = &self.capture else {
            return Ok(false);
        };
        if !self.gate.is_eligible(&participant).await {
            return Ok(false);
        }

        capture
            .register(participant, &self.root_directory.join(&self.session_name))
            .await?;
        Ok(true)
    }

    /// Stops recording `participant` and returns the finalized file.
    pub async fn on_participant_left(&mut self, participant: &ParticipantId) -> Result<Option<PathBuf>> {
        match &self.capture {
            Some(capture) => Ok(capture.unregister(participant).await?),
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> PipelineStatus {
        let (capturing, recordings) = match &self.capture {
            Some(capture) => (
                capture.state() == DispatcherState::Running,
                capture.recordings().await,
            ),
            None => (false, Vec::new()),
        };

        PipelineStatus {
            session_name: self.session_name.clone(),
            session_directory: self.session_directory(),
            capturing,
            recordings,
            conversion: self.converter().map(|q| q.stats()),
            failed_conversions: self.converter().map(|q| q.failures()).unwrap_or_default(),
            retained_sessions: self.retention.len(),
        }
    }

    /// Stops capture (finalizing every recording), stops the conversion
    /// poller and waits for conversions already running.
    pub async fn shutdown(&mut self) {
        info!("Shutting down pipeline");

        if let Some(capture) = self.capture.take() {
            capture.stop().await;
        }

        self.cancel.cancel();

        if let Some(converter) = self.converter.take() {
            let left = converter.queue.stats().pending;
            converter.shut_down().await;
            if left > 0 {
                warn!("{} recordings were left unconverted", left);
            }
        }
    }

    async fn reconcile_converter(&mut self) {
        if !self.config.converter.enabled {
            if let Some(converter) = self.converter.take() {
                let dropped = converter.queue.clear();
                info!("Conversion disabled, dropped {} pending tasks", dropped);
                converter.shut_down().await;
            }
            return;
        }

        if self.converter.is_some() {
            return;
        }

        let encoder = match self.resolve_encoder() {
            Ok(encoder) => encoder,
            Err(e) => {
                warn!(
                    "Audio converter cannot be enabled, recordings stay uncompressed: {}",
                    e
                );
                return;
            }
        };

        let queue = ConversionQueue::new(self.config.converter.conversion_settings(), encoder);
        let cancel = self.cancel.child_token();
        let poller = queue.start(cancel.clone());
        self.converter = Some(ActiveConverter {
            queue,
            cancel,
            poller,
        });
    }

    fn resolve_encoder(&self) -> crate::error::Result<Arc<dyn Encoder>> {
        if let Some(encoder) = &self.encoder {
            return Ok(Arc::clone(encoder));
        }
        let located = FfmpegEncoder::locate(self.config.converter.ffmpeg_directory_path.as_deref())?;
        Ok(Arc::new(located))
    }

    async fn reconcile_capture(&mut self) -> Result<()> {
        if !self.config.recorder.enabled {
            if let Some(capture) = self.capture.take() {
                capture.stop().await;
            }
            return Ok(());
        }

        let converter = self.converter().cloned();
        if let Some(capture) = &self.capture {
            capture.set_converter(converter).await;
        } else {
            let capture = CaptureDispatcher::new(
                Arc::clone(&self.source),
                self.config.recorder.capture_settings(),
                converter,
                self.cancel.child_token(),
            );
            capture.start()?;
            self.capture = Some(capture);
        }

        let Some(capture) = &self.capture else {
            return Ok(());
        };
        let session_directory = self.root_directory.join(&self.session_name);

        for participant in self.host.participants().await {
            if self.gate.is_eligible(&participant).await {
                if let Err(e) = capture.register(participant.clone(), &session_directory).await {
                    error!("Failed to start recording {}: {}", participant, e);
                }
            } else if capture.is_registered(&participant).await {
                info!("{} is no longer eligible for recording", participant);
                if let Err(e) = capture.unregister(&participant).await {
                    error!("Failed to finalize recording for {}: {}", participant, e);
                }
            }
        }

        Ok(())
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn session_name_for(config: &Config) -> String {
    global::format_timestamp(&Local::now(), &config.recorder.session_name_format)
}
