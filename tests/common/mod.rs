#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use voxkeep::audio::{AudioFormat, SampleBuffer, VoiceSource};
use voxkeep::capture::ParticipantId;
use voxkeep::config::Config;
use voxkeep::conversion::{ConversionTask, Encoder};

/// Hands out queued buffers one per read; listed participants fail.
#[derive(Default)]
pub struct ScriptedSource {
    queued: Mutex<HashMap<ParticipantId, VecDeque<SampleBuffer>>>,
    broken: Mutex<Vec<ParticipantId>>,
}

impl ScriptedSource {
    pub fn push(&self, id: &str, format: AudioFormat, data: Vec<u8>) {
        self.queued
            .lock()
            .unwrap()
            .entry(ParticipantId::new(id))
            .or_default()
            .push_back(SampleBuffer::new(format, data));
    }

    pub fn break_participant(&self, id: &str) {
        self.broken.lock().unwrap().push(ParticipantId::new(id));
    }
}

#[async_trait]
impl VoiceSource for ScriptedSource {
    async fn read_available(
        &self,
        participant: &ParticipantId,
        max_bytes: usize,
    ) -> anyhow::Result<Option<SampleBuffer>> {
        if self.broken.lock().unwrap().contains(participant) {
            return Err(anyhow!("voice stream for {} closed", participant));
        }
        let buffer = self
            .queued
            .lock()
            .unwrap()
            .get_mut(participant)
            .and_then(|q| q.pop_front());
        if let Some(buffer) = &buffer {
            assert!(buffer.len() <= max_bytes, "test pushed more than one read");
        }
        Ok(buffer)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Remembers every task and pretends to succeed without touching disk.
#[derive(Default)]
pub struct RecordingEncoder {
    tasks: Mutex<Vec<ConversionTask>>,
}

impl RecordingEncoder {
    pub fn tasks(&self) -> Vec<ConversionTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Encoder for RecordingEncoder {
    async fn convert(&self, task: &ConversionTask) -> voxkeep::Result<PathBuf> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task.output_path())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

pub fn mono() -> AudioFormat {
    AudioFormat::mono(16000)
}

/// Config rooted at `root` whose capture loop only ticks once, so tests
/// drive polling by hand.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.recorder.root_directory_path = Some(root.to_path_buf());
    config.recorder.session_name_format = "Session %H.%M.%S.%f".to_string();
    config.recorder.sample_rate = 16000;
    config.recorder.read_buffer_size = 1000;
    config.recorder.minimum_bytes_to_write = 1000;
    config.recorder.read_interval_ms = 3_600_000;
    config.converter.interval_ms = 10;
    config.converter.delete_after_conversion = false;
    config
}

/// Lets the capture loop run its immediate first tick before tests push audio.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

pub fn wav_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "wav"))
        .collect();
    files.sort();
    files
}
