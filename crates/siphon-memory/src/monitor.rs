use crate::pressure::{PressureLevel, PressureThresholds};
use crate::sample::PressureSample;
use crate::sampler::{MemorySampler, SampleError, SystemSampler};
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// Listener invoked synchronously when the classified level changes.
pub type PressureCallback = Arc<dyn Fn(&PressureEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Delay between background samples.
    pub interval: Duration,
    /// Maximum number of samples kept in [`PressureMonitor::history`].
    pub history_len: usize,
    /// Consecutive sampling failures after which the monitor reports itself stale.
    pub stale_after_failures: u32,
    pub thresholds: PressureThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            history_len: 120,
            stale_after_failures: 3,
            thresholds: PressureThresholds::default(),
        }
    }
}

/// Emitted when the classified pressure level changes.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureEvent {
    pub previous: PressureLevel,
    pub level: PressureLevel,
    /// The sample that triggered the change; `None` for [`PressureMonitor::force_level`].
    pub sample: Option<PressureSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorHealth {
    Healthy,
    /// Recent samples failed; [`PressureMonitor::current_level`] reports the last valid level.
    Stale { consecutive_failures: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

struct Sampling {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: MonitorConfig,
    sampler: Arc<dyn MemorySampler>,
    level: AtomicU8,
    consecutive_failures: AtomicU32,
    stale: AtomicBool,
    history: RwLock<VecDeque<PressureSample>>,
    next_callback_id: AtomicU64,
    listeners: Mutex<Vec<(CallbackId, PressureCallback)>>,
    // Serialises writers (the sampling thread, `sample_now`, `force_level`).
    // Reentrant so a listener may itself trigger a sample.
    writer: ReentrantMutex<()>,
    sampling: Mutex<Option<Sampling>>,
}

/// Samples memory usage and classifies it into a [`PressureLevel`].
///
/// Cloning is cheap; all clones share the same state. The background loop
/// started by [`PressureMonitor::start`] is the only periodic writer, and level
/// reads never take a lock.
#[derive(Clone)]
pub struct PressureMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PressureMonitor")
            .field("level", &self.current_level())
            .field("health", &self.health())
            .field("running", &self.is_running())
            .finish()
    }
}

impl PressureMonitor {
    /// Monitor backed by [`SystemSampler`].
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_sampler(config, Arc::new(SystemSampler::new()))
    }

    pub fn with_sampler(config: MonitorConfig, sampler: Arc<dyn MemorySampler>) -> Self {
        let config = MonitorConfig {
            history_len: config.history_len.max(1),
            stale_after_failures: config.stale_after_failures.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                history: RwLock::new(VecDeque::with_capacity(config.history_len)),
                config,
                sampler,
                level: AtomicU8::new(PressureLevel::Normal.to_u8()),
                consecutive_failures: AtomicU32::new(0),
                stale: AtomicBool::new(false),
                next_callback_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
                writer: ReentrantMutex::new(()),
                sampling: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start the background sampling loop. Calling it while running is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut sampling = self.inner.sampling.lock();
        if sampling.is_some() {
            return Ok(());
        }

        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.interval;
        let handle = thread::Builder::new()
            .name("siphon-pressure".to_owned())
            .spawn(move || loop {
                match weak.upgrade() {
                    Some(inner) => {
                        // Failures are absorbed inside `tick`; a failed sample is a missed tick.
                        let _ = inner.tick();
                    }
                    None => break,
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        tracing::debug!(
            target = "siphon.memory",
            interval_ms = interval.as_millis() as u64,
            "pressure monitor started"
        );
        *sampling = Some(Sampling { stop, handle });
        Ok(())
    }

    /// Stop the background loop and wait for it to exit.
    pub fn stop(&self) {
        let sampling = self.inner.sampling.lock().take();
        if let Some(sampling) = sampling {
            sampling.shutdown();
            tracing::debug!(target = "siphon.memory", "pressure monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.sampling.lock().is_some()
    }

    /// Last classified level. Never blocks.
    pub fn current_level(&self) -> PressureLevel {
        PressureLevel::from_u8(self.inner.level.load(Ordering::Acquire))
    }

    /// Bytes a cache currently holding `current_cache_size` bytes should shed now.
    pub fn eviction_target_bytes(&self, current_cache_size: u64) -> u64 {
        self.current_level().eviction_target_bytes(current_cache_size)
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&PressureEvent) + Send + Sync + 'static,
    {
        let id = CallbackId(self.inner.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` when `id` was not registered.
    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Take one sample synchronously, exactly as the background loop would.
    pub fn sample_now(&self) -> Result<PressureSample, SampleError> {
        self.inner.tick()
    }

    /// Publish `level` without sampling. The next successful sample replaces it.
    pub fn force_level(&self, level: PressureLevel) {
        let _writer = self.inner.writer.lock();
        tracing::debug!(target = "siphon.memory", ?level, "pressure level forced");
        self.inner.publish(level, None);
    }

    /// Recorded samples, oldest first.
    pub fn history(&self) -> Vec<PressureSample> {
        self.inner.history.read().iter().copied().collect()
    }

    pub fn latest_sample(&self) -> Option<PressureSample> {
        self.inner.history.read().back().copied()
    }

    pub fn health(&self) -> MonitorHealth {
        if self.inner.stale.load(Ordering::Acquire) {
            MonitorHealth::Stale {
                consecutive_failures: self.inner.consecutive_failures.load(Ordering::Acquire),
            }
        } else {
            MonitorHealth::Healthy
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.health(), MonitorHealth::Stale { .. })
    }
}

impl Inner {
    fn tick(&self) -> Result<PressureSample, SampleError> {
        let _writer = self.writer.lock();
        match self.sampler.sample() {
            Ok(reading) => {
                let sample = PressureSample::from_reading(reading, SystemTime::now());
                let failures = self.consecutive_failures.swap(0, Ordering::AcqRel);
                if self.stale.swap(false, Ordering::AcqRel) {
                    tracing::info!(
                        target = "siphon.memory",
                        failures,
                        "memory sampling recovered"
                    );
                }

                {
                    let mut history = self.history.write();
                    while history.len() >= self.config.history_len {
                        history.pop_front();
                    }
                    history.push_back(sample);
                }

                let level = self.config.thresholds.level_for_percent(sample.percent_used);
                self.publish(level, Some(sample));
                Ok(sample)
            }
            Err(err) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(
                    target = "siphon.memory",
                    error = %err,
                    failures,
                    "memory sample failed; keeping last level"
                );
                if failures >= self.config.stale_after_failures
                    && !self.stale.swap(true, Ordering::AcqRel)
                {
                    tracing::warn!(
                        target = "siphon.memory",
                        failures,
                        level = ?PressureLevel::from_u8(self.level.load(Ordering::Acquire)),
                        "pressure monitor is stale"
                    );
                }
                Err(err)
            }
        }
    }

    fn publish(&self, level: PressureLevel, sample: Option<PressureSample>) {
        let previous = PressureLevel::from_u8(self.level.swap(level.to_u8(), Ordering::AcqRel));
        if previous == level {
            return;
        }

        tracing::debug!(
            target = "siphon.memory",
            ?previous,
            ?level,
            percent_used = sample.map(|sample| sample.percent_used),
            "memory pressure level changed"
        );

        let event = PressureEvent {
            previous,
            level,
            sample,
        };
        let listeners: Vec<PressureCallback> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                tracing::error!(
                    target = "siphon.memory",
                    ?level,
                    "pressure callback panicked"
                );
            }
        }
    }
}

impl Sampling {
    fn shutdown(self) {
        drop(self.stop);
        // The loop may drop the last strong reference itself; never join from inside it.
        if self.handle.thread().id() != thread::current().id() {
            let _ = self.handle.join();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(sampling) = self.sampling.get_mut().take() {
            sampling.shutdown();
        }
    }
}
