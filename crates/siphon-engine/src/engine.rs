use crate::builder::EngineBuilder;
use crate::error::EngineError;
use siphon_cache::CacheStats;
use siphon_config::SiphonConfig;
use siphon_core::{FileRef, FormatHint, Priority};
use siphon_memory::{PressureLevel, PressureMonitor};
use siphon_metrics::{AggregateMetrics, ExtractionMetrics};
use siphon_scheduler::{
    ExtractionResult, ProgressReceiver, Scheduler, SubmitError, TaskHandle, TaskSpec, TaskStatus,
    WholeFileCache,
};
use std::sync::Arc;
use std::time::Duration;

/// One running extraction service.
///
/// Shutting down (explicitly or by dropping) drains submitted work, then
/// stops memory sampling.
pub struct ExtractionEngine {
    config: SiphonConfig,
    monitor: PressureMonitor,
    cache: Arc<WholeFileCache>,
    metrics: Arc<ExtractionMetrics>,
    scheduler: Scheduler,
}

impl std::fmt::Debug for ExtractionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionEngine")
            .field("monitor", &self.monitor)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ExtractionEngine {
    pub fn builder(config: SiphonConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub(crate) fn assemble(
        config: SiphonConfig,
        monitor: PressureMonitor,
        cache: Arc<WholeFileCache>,
        metrics: Arc<ExtractionMetrics>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            config,
            monitor,
            cache,
            metrics,
            scheduler,
        }
    }

    pub fn config(&self) -> &SiphonConfig {
        &self.config
    }

    pub fn monitor(&self) -> &PressureMonitor {
        &self.monitor
    }

    pub fn cache(&self) -> &Arc<WholeFileCache> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn submit(
        &self,
        file: impl Into<FileRef>,
        format: impl Into<FormatHint>,
        priority: Priority,
    ) -> Result<TaskHandle, SubmitError> {
        self.submit_task(TaskSpec::new(file, format).priority(priority))
    }

    pub fn submit_task(&self, spec: TaskSpec) -> Result<TaskHandle, SubmitError> {
        self.scheduler.submit(spec)
    }

    /// All-or-nothing: either every task is queued or none is.
    pub fn submit_batch<I>(&self, specs: I) -> Result<Vec<TaskHandle>, SubmitError>
    where
        I: IntoIterator<Item = TaskSpec>,
    {
        self.scheduler.submit_batch(specs)
    }

    /// Submit and block until the terminal result.
    pub fn run_sync(&self, spec: TaskSpec) -> Result<ExtractionResult, SubmitError> {
        self.scheduler.run_sync(spec)
    }

    pub fn status(&self, handle: &TaskHandle) -> TaskStatus {
        handle.status()
    }

    /// Block until `handle` is terminal.
    pub fn result(&self, handle: &TaskHandle) -> ExtractionResult {
        handle.wait()
    }

    pub fn result_timeout(&self, handle: &TaskHandle, timeout: Duration) -> Option<ExtractionResult> {
        handle.wait_timeout(timeout)
    }

    /// The terminal result, or [`EngineError::NotFinished`] without blocking.
    pub fn try_result(&self, handle: &TaskHandle) -> Result<ExtractionResult, EngineError> {
        handle
            .try_result()
            .ok_or_else(|| EngineError::NotFinished(handle.id()))
    }

    /// `false` when the task had already finished.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        let cancelled = handle.cancel();
        if cancelled {
            tracing::debug!(target = "siphon.engine", task = %handle.id(), "cancellation requested");
        }
        cancelled
    }

    pub fn metrics_snapshot(&self) -> AggregateMetrics {
        self.metrics.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pressure_level(&self) -> PressureLevel {
        self.monitor.current_level()
    }

    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.scheduler.subscribe_progress()
    }

    /// Stop accepting work, finish everything submitted, then stop sampling.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.monitor.stop();
        tracing::debug!(target = "siphon.engine", "extraction engine stopped");
    }

    /// Like [`ExtractionEngine::shutdown`] but queued tasks are cancelled.
    pub fn shutdown_now(&self) {
        self.scheduler.shutdown_now();
        self.monitor.stop();
        tracing::debug!(target = "siphon.engine", "extraction engine stopped");
    }
}

impl Drop for ExtractionEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
