//! Capture loop routing per-participant audio to recorders.
//!
//! The registry is shared between the poll loop (reads) and the session
//! coordinator (register/unregister/clear). A poll iteration works on a
//! snapshot of the registry and re-checks each recorder under its own lock,
//! so a participant removed mid-iteration is never written to after it has
//! been disposed. Unregistration removes the entry first and then waits for
//! the recorder's lock, which lets an in-flight write finish before the
//! final flush.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::participant::ParticipantId;
use super::recorder::{Recorder, RecorderSettings};
use super::status::RecordingStatus;
use crate::audio::{AudioFormat, SampleBuffer, VoiceSource};
use crate::conversion::ConversionQueue;
use crate::error::{PipelineError, Result};

pub type SharedRecorder = Arc<Mutex<Recorder>>;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Format new recorders start in, until the source reports otherwise.
    pub format: AudioFormat,
    /// Upper bound on bytes read per participant per tick.
    pub read_buffer_size: usize,
    pub poll_interval: Duration,
    pub timestamp_format: String,
    pub min_bytes_to_write: usize,
    pub rollover_after: Option<Duration>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            read_buffer_size: 19200,
            poll_interval: Duration::from_millis(100),
            timestamp_format: crate::global::DEFAULT_TIMESTAMP_FORMAT.to_string(),
            min_bytes_to_write: 19200,
            rollover_after: None,
        }
    }
}

impl CaptureSettings {
    fn recorder_settings(&self, root_directory: &Path) -> RecorderSettings {
        RecorderSettings {
            root_directory: root_directory.to_path_buf(),
            timestamp_format: self.timestamp_format.clone(),
            min_bytes_to_write: self.min_bytes_to_write,
            rollover_after: self.rollover_after,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Running,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

pub struct CaptureDispatcher {
    inner: Arc<DispatcherInner>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

struct DispatcherInner {
    source: Arc<dyn VoiceSource>,
    settings: CaptureSettings,
    registry: RwLock<HashMap<ParticipantId, SharedRecorder>>,
    converter: RwLock<Option<ConversionQueue>>,
    cancel: CancellationToken,
}

impl CaptureDispatcher {
    pub fn new(
        source: Arc<dyn VoiceSource>,
        settings: CaptureSettings,
        converter: Option<ConversionQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                source,
                settings,
                registry: RwLock::new(HashMap::new()),
                converter: RwLock::new(converter),
                cancel,
            }),
            task: StdMutex::new(None),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> DispatcherState {
        let running = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());

        if running && !self.inner.cancel.is_cancelled() {
            DispatcherState::Running
        } else {
            DispatcherState::Stopped
        }
    }

    /// Starts the poll loop. Calling it while already running does nothing;
    /// a dispatcher that has been stopped cannot be started again.
    pub fn start(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Capture dispatcher already running");
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run().await }));

        info!(
            "Capture dispatcher started (source: {}, every {:?})",
            self.inner.source.name(),
            self.inner.settings.poll_interval
        );
        Ok(())
    }

    /// Ends the poll loop and disposes every recorder.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Capture loop terminated abnormally: {}", e);
            }
        }

        let disposed = self.clear().await;
        info!("Capture dispatcher stopped ({} recorders disposed)", disposed);
    }

    /// Runs one poll iteration over every registered participant.
    pub async fn poll_once(&self) {
        self.inner.poll_once().await;
    }

    /// Creates and tracks a recorder writing into `session_dir`. Returns the
    /// existing recorder if the participant is already registered for that
    /// directory; a recorder left over from another session is finalized and
    /// replaced.
    pub async fn register(
        &self,
        participant: ParticipantId,
        session_dir: &Path,
    ) -> Result<SharedRecorder> {
        if self.inner.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut registry = self.inner.registry.write().await;
        if let Some(existing) = registry.get(&participant).cloned() {
            let same_session = existing.lock().await.root_directory() == session_dir;
            if same_session {
                debug!("{} is already registered", participant);
                return Ok(existing);
            }

            info!(
                "{} moved to {:?}, finalizing previous recording",
                participant, session_dir
            );
            registry.remove(&participant);
            if let Err(e) = existing.lock().await.dispose() {
                error!("Failed to finalize recording for {}: {}", participant, e);
            }
        }

        let converter = self.inner.converter.read().await.clone();
        let recorder = Recorder::new(
            participant.clone(),
            self.inner.settings.format,
            self.inner.settings.recorder_settings(session_dir),
            converter,
        )?;

        let shared = Arc::new(Mutex::new(recorder));
        registry.insert(participant, Arc::clone(&shared));
        Ok(shared)
    }

    /// Removes the participant and disposes its recorder once any write in
    /// progress has finished. Returns the finalized file.
    pub async fn unregister(&self, participant: &ParticipantId) -> Result<Option<PathBuf>> {
        let removed = self.inner.registry.write().await.remove(participant);
        let Some(recorder) = removed else {
            debug!("{} is not registered", participant);
            return Ok(None);
        };

        let mut recorder = recorder.lock().await;
        recorder.dispose()
    }

    /// Disposes every recorder and empties the registry. The poll loop keeps
    /// running. Returns how many recorders were disposed.
    pub async fn clear(&self) -> usize {
        let drained: Vec<(ParticipantId, SharedRecorder)> =
            self.inner.registry.write().await.drain().collect();

        let count = drained.len();
        for (participant, recorder) in drained {
            if let Err(e) = recorder.lock().await.dispose() {
                error!("Failed to finalize recording for {}: {}", participant, e);
            }
        }
        count
    }

    /// Points current and future recorders at a different conversion queue.
    pub async fn set_converter(&self, converter: Option<ConversionQueue>) {
        *self.inner.converter.write().await = converter.clone();
        for recorder in self.inner.snapshot().await {
            recorder.lock().await.set_converter(converter.clone());
        }
    }

    pub async fn participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.inner.registry.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn recorder(&self, participant: &ParticipantId) -> Option<SharedRecorder> {
        self.inner.registry.read().await.get(participant).cloned()
    }

    pub async fn is_registered(&self, participant: &ParticipantId) -> bool {
        self.inner.registry.read().await.contains_key(participant)
    }

    pub async fn len(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Status of every active recording, ordered by participant.
    pub async fn recordings(&self) -> Vec<RecordingStatus> {
        let mut statuses = Vec::new();
        for recorder in self.inner.snapshot().await {
            statuses.push(recorder.lock().await.status());
        }
        statuses.sort_by(|a, b| a.participant.cmp(&b.participant));
        statuses
    }
}

impl Drop for CaptureDispatcher {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl DispatcherInner {
    async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once().await;
        }

        debug!("Capture loop exited");
    }

    async fn snapshot(&self) -> Vec<SharedRecorder> {
        self.registry.read().await.values().cloned().collect()
    }

    async fn poll_once(&self) {
        let entries: Vec<(ParticipantId, SharedRecorder)> = self
            .registry
            .read()
            .await
            .iter()
            .map(|(id, rec)| (id.clone(), Arc::clone(rec)))
            .collect();

        for (participant, recorder) in entries {
            if self.cancel.is_cancelled() {
                debug!("Capture cancelled mid-tick");
                return;
            }

            let buffer = match self
                .source
                .read_available(&participant, self.settings.read_buffer_size)
                .await
            {
                Ok(Some(buffer)) if !buffer.is_empty() => buffer,
                Ok(_) => continue,
                Err(e) => {
                    warn!(
                        "Failed to read audio for {} from {}: {:#}",
                        participant,
                        self.source.name(),
                        e
                    );
                    continue;
                }
            };

            match self.deliver(&recorder, buffer).await {
                Ok(()) => {}
                Err(PipelineError::Cancelled) => {
                    debug!("Capture cancelled, not writing audio read for {}", participant);
                    return;
                }
                Err(e) => {
                    error!("Abandoning recording for {}: {}", participant, e);
                    self.abandon(&participant, &recorder, e).await;
                }
            }
        }
    }

    async fn deliver(&self, recorder: &SharedRecorder, buffer: SampleBuffer) -> Result<()> {
        let mut recorder = recorder.lock().await;
        if recorder.is_disposed() {
            debug!("Dropping audio for disposed recorder {}", recorder.participant());
            return Ok(());
        }

        if buffer.format != recorder.format() {
            recorder.reset(Some(buffer.format))?;
        }

        debug!("{} bytes for {}", buffer.len(), recorder.participant());
        recorder.write_until(&buffer.data, &self.cancel)
    }

    async fn abandon(&self, participant: &ParticipantId, recorder: &SharedRecorder, reason: PipelineError) {
        {
            let mut guard = recorder.lock().await;
            guard.mark_failed(reason.to_string());
            if let Err(e) = guard.dispose() {
                warn!("Failed to finalize abandoned recording for {}: {}", participant, e);
            }
        }

        let mut registry = self.registry.write().await;
        if registry
            .get(participant)
            .is_some_and(|current| Arc::ptr_eq(current, recorder))
        {
            registry.remove(participant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use crate::capture::RecorderPhase;

    #[derive(Default)]
    struct ScriptedSource {
        queued: StdMutex<HashMap<ParticipantId, VecDeque<SampleBuffer>>>,
        broken: StdMutex<Vec<ParticipantId>>,
    }

    impl ScriptedSource {
        fn push(&self, id: &str, format: AudioFormat, data: Vec<u8>) {
            self.queued
                .lock()
                .unwrap()
                .entry(ParticipantId::new(id))
                .or_default()
                .push_back(SampleBuffer::new(format, data));
        }

        fn break_participant(&self, id: &str) {
            self.broken.lock().unwrap().push(ParticipantId::new(id));
        }
    }

    #[async_trait]
    impl VoiceSource for ScriptedSource {
        async fn read_available(
            &self,
            participant: &ParticipantId,
            _max_bytes: usize,
        ) -> anyhow::Result<Option<SampleBuffer>> {
            if self.broken.lock().unwrap().contains(participant) {
                return Err(anyhow!("stream closed"));
            }
            Ok(self
                .queued
                .lock()
                .unwrap()
                .get_mut(participant)
                .and_then(|q| q.pop_front()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Hands `alice` one buffer, pausing inside the read until released.
    #[derive(Default)]
    struct GatedSource {
        entered: Notify,
        release: Notify,
        cancel_on_read: Option<CancellationToken>,
        reads: StdMutex<Vec<ParticipantId>>,
    }

    #[async_trait]
    impl VoiceSource for GatedSource {
        async fn read_available(
            &self,
            participant: &ParticipantId,
            _max_bytes: usize,
        ) -> anyhow::Result<Option<SampleBuffer>> {
            self.reads.lock().unwrap().push(participant.clone());
            if let Some(cancel) = &self.cancel_on_read {
                cancel.cancel();
            }
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Some(SampleBuffer::new(format(), vec![7, 0, 7, 0])))
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    fn format() -> AudioFormat {
        AudioFormat::mono(16000)
    }

    fn dispatcher(source: Arc<ScriptedSource>) -> CaptureDispatcher {
        let settings = CaptureSettings {
            format: format(),
            read_buffer_size: 1024,
            poll_interval: Duration::from_millis(10),
            timestamp_format: "%H.%M.%S".to_string(),
            min_bytes_to_write: 0,
            rollover_after: None,
        };
        CaptureDispatcher::new(source, settings, None, CancellationToken::new())
    }

    fn samples(path: &Path) -> Vec<i16> {
        hound::WavReader::open(path)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(Arc::new(ScriptedSource::default()));
        let alice = ParticipantId::new("alice");

        let first = dispatcher.register(alice.clone(), dir.path()).await.unwrap();
        let second = dispatcher.register(alice.clone(), dir.path()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dispatcher.len().await, 1);
        assert!(dispatcher.is_registered(&alice).await);
    }

    #[tokio::test]
    async fn test_audio_reaches_matching_recorder_only() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));

        dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        dispatcher.register(ParticipantId::new("bob"), dir.path()).await.unwrap();

        source.push("alice", format(), vec![1, 0, 1, 0]);
        source.push("bob", format(), vec![2, 0]);
        dispatcher.poll_once().await;
        source.push("alice", format(), vec![1, 0]);
        dispatcher.poll_once().await;

        let alice = dispatcher.unregister(&ParticipantId::new("alice")).await.unwrap().unwrap();
        let bob = dispatcher.unregister(&ParticipantId::new("bob")).await.unwrap().unwrap();

        assert_eq!(samples(&alice), vec![1, 1, 1]);
        assert_eq!(samples(&bob), vec![2]);
        assert!(dispatcher.is_empty().await);
    }

    #[tokio::test]
    async fn test_format_change_resets_recorder() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));

        let recorder = dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        source.push("alice", format(), vec![0u8; 32]);
        dispatcher.poll_once().await;
        source.push("alice", AudioFormat::new(48000, 2), vec![0u8; 32]);
        dispatcher.poll_once().await;

        let guard = recorder.lock().await;
        assert_eq!(guard.format(), AudioFormat::new(48000, 2));
        assert_eq!(guard.finished_files().len(), 1);
        assert_eq!(guard.status().bytes_written, 32);
    }

    #[tokio::test]
    async fn test_source_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));

        dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        dispatcher.register(ParticipantId::new("bob"), dir.path()).await.unwrap();
        source.break_participant("alice");
        source.push("bob", format(), vec![5, 0, 6, 0]);

        dispatcher.poll_once().await;

        let bob = dispatcher.unregister(&ParticipantId::new("bob")).await.unwrap().unwrap();
        assert_eq!(samples(&bob), vec![5, 6]);
        assert!(dispatcher.is_registered(&ParticipantId::new("alice")).await);
    }

    #[tokio::test]
    async fn test_unregistered_recorder_is_not_written() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));
        let alice = ParticipantId::new("alice");

        let recorder = dispatcher.register(alice.clone(), dir.path()).await.unwrap();
        dispatcher.unregister(&alice).await.unwrap();

        source.push("alice", format(), vec![1, 0]);
        dispatcher.poll_once().await;

        let guard = recorder.lock().await;
        assert!(guard.is_disposed());
        assert_eq!(samples(&guard.finished_files()[0]), Vec::<i16>::new());
    }

    #[tokio::test]
    async fn test_participant_removed_during_read_is_not_written() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(GatedSource::default());
        let dispatcher = CaptureDispatcher::new(
            Arc::clone(&source) as Arc<dyn VoiceSource>,
            CaptureSettings {
                format: format(),
                min_bytes_to_write: 0,
                ..CaptureSettings::default()
            },
            None,
            CancellationToken::new(),
        );
        let alice = ParticipantId::new("alice");
        let recorder = dispatcher.register(alice.clone(), dir.path()).await.unwrap();

        let removal = async {
            source.entered.notified().await;
            let finished = dispatcher.unregister(&alice).await.unwrap();
            source.release.notify_one();
            finished
        };
        let ((), finished) = tokio::join!(dispatcher.poll_once(), removal);

        let finished = finished.unwrap();
        assert_eq!(samples(&finished), Vec::<i16>::new());
        let guard = recorder.lock().await;
        assert_eq!(guard.phase(), RecorderPhase::Disposed);
        assert!(guard.status().last_error.is_none());
        assert_eq!(guard.finished_files(), &[finished]);
        assert!(dispatcher.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_mid_tick_skips_write_without_abandoning() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let source = Arc::new(GatedSource {
            cancel_on_read: Some(cancel.clone()),
            ..GatedSource::default()
        });
        source.release.notify_one();
        let dispatcher = CaptureDispatcher::new(
            Arc::clone(&source) as Arc<dyn VoiceSource>,
            CaptureSettings {
                format: format(),
                min_bytes_to_write: 0,
                ..CaptureSettings::default()
            },
            None,
            cancel,
        );
        let recorder = dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        dispatcher.register(ParticipantId::new("bob"), dir.path()).await.unwrap();

        dispatcher.poll_once().await;

        assert_eq!(source.reads.lock().unwrap().len(), 1);
        let guard = recorder.lock().await;
        assert_eq!(guard.phase(), RecorderPhase::Recording);
        assert_eq!(guard.status().bytes_written, 0);
        drop(guard);
        assert_eq!(dispatcher.len().await, 2);
    }

    #[tokio::test]
    async fn test_register_for_new_session_replaces_stale_recorder() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));
        let alice = ParticipantId::new("alice");
        let first_session = dir.path().join("first");
        let second_session = dir.path().join("second");

        let old = dispatcher.register(alice.clone(), &first_session).await.unwrap();
        source.push("alice", format(), vec![3, 0, 4, 0]);
        dispatcher.poll_once().await;

        let new = dispatcher.register(alice.clone(), &second_session).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(dispatcher.len().await, 1);

        let old = old.lock().await;
        assert!(old.is_disposed());
        assert_eq!(samples(&old.finished_files()[0]), vec![3, 4]);
        assert!(new.lock().await.current_path().starts_with(&second_session));
    }

    #[tokio::test]
    async fn test_clear_disposes_all_and_keeps_running() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(Arc::new(ScriptedSource::default()));

        dispatcher.start().unwrap();
        dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        dispatcher.register(ParticipantId::new("bob"), dir.path()).await.unwrap();

        assert_eq!(dispatcher.clear().await, 2);
        assert!(dispatcher.is_empty().await);
        assert_eq!(dispatcher.state(), DispatcherState::Running);

        dispatcher.register(ParticipantId::new("carol"), dir.path()).await.unwrap();
        dispatcher.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_running_loop_records_until_stop() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));

        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        dispatcher.start().unwrap();
        assert_eq!(dispatcher.state(), DispatcherState::Running);

        let recorder = dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        for i in 0..5 {
            source.push("alice", format(), vec![i, 0]);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        dispatcher.stop().await;
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(dispatcher.is_empty().await);

        let guard = recorder.lock().await;
        assert!(guard.is_disposed());
        assert_eq!(samples(&guard.finished_files()[0]), vec![0, 1, 2, 3, 4]);

        assert!(matches!(dispatcher.start(), Err(PipelineError::Cancelled)));
        assert!(matches!(
            dispatcher.register(ParticipantId::new("bob"), dir.path()).await,
            Err(PipelineError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_recordings_lists_status() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::default());
        let dispatcher = dispatcher(Arc::clone(&source));

        dispatcher.register(ParticipantId::new("bob"), dir.path()).await.unwrap();
        dispatcher.register(ParticipantId::new("alice"), dir.path()).await.unwrap();
        source.push("bob", format(), vec![0u8; 3200]);
        dispatcher.poll_once().await;

        let statuses = dispatcher.recordings().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].participant.as_str(), "alice");
        assert_eq!(statuses[1].bytes_written, 3200);
        assert!((statuses[1].duration_secs - 0.1).abs() < 1e-9);
    }
}
