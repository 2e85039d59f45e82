//! Bounded-concurrency conversion worker pool.
//!
//! The backlog is unbounded; what is bounded is the number of encoder runs
//! in flight. A poller wakes every `poll_interval`, claims free slots from
//! an atomic counter and launches one task per claimed slot. Slots are
//! released by the spawned task itself when the encoder returns.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::encoder::Encoder;
use super::task::{ConversionSettings, ConversionTask};

/// A conversion that did not produce output. Its source file is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedConversion {
    pub task: ConversionTask,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub pending: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Clone)]
pub struct ConversionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    settings: ConversionSettings,
    encoder: Arc<dyn Encoder>,
    pending: Mutex<VecDeque<ConversionTask>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicU64,
    failures: Mutex<Vec<FailedConversion>>,
    tracker: TaskTracker,
}

/// One claimed encoder slot; releases itself when dropped.
struct InFlightSlot {
    inner: Arc<QueueInner>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConversionQueue {
    pub fn new(settings: ConversionSettings, encoder: Arc<dyn Encoder>) -> Self {
        info!(
            "Conversion queue initialized: {} via {} ({}k, preset {}, {} concurrent)",
            settings.container,
            encoder.name(),
            settings.bitrate_kbps,
            settings.preset.map_or("default", |preset| preset.as_str()),
            settings.concurrent_limit
        );

        Self {
            inner: Arc::new(QueueInner {
                settings,
                encoder,
                pending: Mutex::new(VecDeque::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failures: Mutex::new(Vec::new()),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.inner.settings
    }

    /// Appends a task to the backlog. Never blocks on conversion capacity.
    pub fn enqueue(&self, task: ConversionTask) {
        debug!("Queued conversion of {:?}", task.source_path);
        lock(&self.inner.pending).push_back(task);
    }

    /// Builds a task for `source_path` from the queue settings and enqueues it.
    pub fn enqueue_file(&self, source_path: &Path) -> ConversionTask {
        let task = self.inner.settings.task_for(source_path);
        self.enqueue(task.clone());
        task
    }

    /// Drops every task that has not started yet. Running conversions are
    /// left alone.
    pub fn clear(&self) -> usize {
        let mut pending = lock(&self.inner.pending);
        let dropped = pending.len();
        pending.clear();

        if dropped > 0 {
            info!("Cleared {} pending conversions", dropped);
        }
        dropped
    }

    /// Spawns the poller. It stops launching work once `cancel` fires;
    /// conversions already running are not interrupted.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        let poll_interval = self.inner.settings.poll_interval;

        tokio::spawn(async move {
            info!("Conversion poller started (every {:?})", poll_interval);

            let mut ticker = interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let launched = queue.launch_ready();
                if launched > 0 {
                    debug!("Launched {} conversions", launched);
                }
            }

            info!("Conversion poller stopped");
        })
    }

    /// Claims as many free slots as there are pending tasks and starts a
    /// conversion in each. Returns how many were started.
    pub fn launch_ready(&self) -> usize {
        let mut launched = 0;

        while let Some(slot) = self.try_acquire_slot() {
            let task = lock(&self.inner.pending).pop_front();
            match task {
                Some(task) => {
                    self.spawn_conversion(task, slot);
                    launched += 1;
                }
                None => break,
            }
        }

        launched
    }

    fn try_acquire_slot(&self) -> Option<InFlightSlot> {
        let limit = self.inner.settings.concurrent_limit;

        let previous = self
            .inner
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()?;

        self.inner
            .peak_in_flight
            .fetch_max(previous + 1, Ordering::SeqCst);

        Some(InFlightSlot {
            inner: Arc::clone(&self.inner),
        })
    }

    fn spawn_conversion(&self, task: ConversionTask, slot: InFlightSlot) {
        let inner = Arc::clone(&self.inner);

        self.inner.tracker.spawn(async move {
            let _slot = slot;
            inner.run(task).await;
        });
    }

    /// Waits until every conversion started so far has finished.
    pub async fn wait_for_in_flight(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.inner.pending).is_empty() && self.inner.in_flight.load(Ordering::SeqCst) == 0
    }

    pub fn stats(&self) -> ConversionStats {
        ConversionStats {
            pending: lock(&self.inner.pending).len(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.inner.peak_in_flight.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::SeqCst),
            failed: lock(&self.inner.failures).len() as u64,
        }
    }

    pub fn failures(&self) -> Vec<FailedConversion> {
        lock(&self.inner.failures).clone()
    }
}

impl QueueInner {
    async fn run(&self, task: ConversionTask) {
        info!(
            "Converting {:?} to {} ({})",
            task.source_path, task.container, task.target_format
        );

        match self.encoder.convert(&task).await {
            Ok(output) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                info!("Converted {:?} -> {:?}", task.source_path, output);

                if task.delete_source_on_success {
                    if let Err(e) = tokio::fs::remove_file(&task.source_path).await {
                        warn!("Failed to delete converted source {:?}: {}", task.source_path, e);
                    } else {
                        debug!("Deleted converted source {:?}", task.source_path);
                    }
                }
            }
            Err(e) => {
                error!("Conversion of {:?} failed: {}", task.source_path, e);
                lock(&self.failures).push(FailedConversion {
                    task,
                    reason: e.to_string(),
                });
            }
        }
    }
}
