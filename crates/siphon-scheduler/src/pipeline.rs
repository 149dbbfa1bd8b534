use crate::context::TaskContext;
use crate::extractor::ExtractorRegistry;
use crate::task::ExtractionTask;
use siphon_cache::AdaptiveCache;
use siphon_core::{ExtractError, FileRef, RawFields};
use siphon_memory::{DegradedSettings, PressureLevel, PressureMonitor};
use siphon_stream::{ExtractionInput, StreamingExtractor, WholeFile};
use std::sync::Arc;

/// Whole-file buffers shared between tasks touching the same file.
pub type WholeFileCache = AdaptiveCache<FileRef, WholeFile>;

/// The body a worker runs for each attempt.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &ExtractionTask, ctx: &TaskContext) -> Result<RawFields, ExtractError>;
}

impl<F> TaskRunner for F
where
    F: Fn(&ExtractionTask, &TaskContext) -> Result<RawFields, ExtractError> + Send + Sync,
{
    fn run(&self, task: &ExtractionTask, ctx: &TaskContext) -> Result<RawFields, ExtractError> {
        self(task, ctx)
    }
}

/// Resolve, read (whole or streamed), then hand the input to the field extractor.
pub struct Pipeline {
    streaming: Arc<StreamingExtractor>,
    extractors: ExtractorRegistry,
    cache: Option<Arc<WholeFileCache>>,
    monitor: Option<PressureMonitor>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("streaming", &self.streaming)
            .field("extractors", &self.extractors)
            .field("cache", &self.cache.is_some())
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

impl Pipeline {
    pub fn new(streaming: Arc<StreamingExtractor>, extractors: ExtractorRegistry) -> Self {
        Self {
            streaming,
            extractors,
            cache: None,
            monitor: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<WholeFileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Consult `monitor` for the degraded settings of each attempt.
    pub fn with_monitor(mut self, monitor: PressureMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn streaming(&self) -> &Arc<StreamingExtractor> {
        &self.streaming
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    pub fn cache(&self) -> Option<&Arc<WholeFileCache>> {
        self.cache.as_ref()
    }

    fn settings(&self) -> DegradedSettings {
        let level = self
            .monitor
            .as_ref()
            .map_or(PressureLevel::Normal, PressureMonitor::current_level);
        DegradedSettings::for_level(level)
    }

    fn input_for(
        &self,
        task: &ExtractionTask,
        ctx: &TaskContext,
        settings: DegradedSettings,
    ) -> Result<ExtractionInput, ExtractError> {
        if settings.read_whole_files {
            if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&task.file)) {
                tracing::trace!(target = "siphon.scheduler", task = %task.id, file = %task.file, "whole-file cache hit");
                return Ok(ExtractionInput::Whole(WholeFile {
                    format: task.format.clone(),
                    ..cached
                }));
            }
        }

        let input = self.streaming.prepare(
            &task.file,
            &task.format,
            ctx.stream_options(),
            settings.read_whole_files,
        )?;

        if let (ExtractionInput::Whole(whole), Some(cache)) = (&input, &self.cache) {
            if settings.populate_cache {
                if let Err(err) = cache.put(task.file.clone(), whole.clone(), whole.len() as u64) {
                    tracing::debug!(
                        target = "siphon.scheduler",
                        task = %task.id,
                        file = %task.file,
                        error = %err,
                        "whole-file buffer not cached"
                    );
                }
            }
        }
        Ok(input)
    }
}

impl TaskRunner for Pipeline {
    fn run(&self, task: &ExtractionTask, ctx: &TaskContext) -> Result<RawFields, ExtractError> {
        ctx.check()?;
        let extractor = self.extractors.resolve(&task.format)?;
        let settings = self.settings();
        let input = self.input_for(task, ctx, settings)?;
        let streamed = input.is_streaming();
        let fields = extractor.extract(input, ctx)?;
        if !streamed {
            ctx.report_progress(100.0);
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_cache::CacheConfig;
    use siphon_core::{FormatHint, Priority, TaskId};
    use siphon_memory::{MonitorConfig, PressureLevel};
    use siphon_stream::{StreamConfig, SyntheticResolver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    fn task(file: &str) -> ExtractionTask {
        ExtractionTask {
            id: TaskId::next(),
            file: file.into(),
            format: FormatHint::new("bin"),
            priority: Priority::Normal,
            retry_count: 0,
            max_retries: 0,
            submitted_at: SystemTime::now(),
            timeout: None,
        }
    }

    struct Fixture {
        pipeline: Pipeline,
        cache: Arc<WholeFileCache>,
        streamed: Arc<AtomicUsize>,
    }

    fn fixture(monitor: Option<PressureMonitor>) -> Fixture {
        let resolver = Arc::new(SyntheticResolver::new());
        resolver.insert_generated("small", 1_000, 1);
        resolver.insert_generated("large", 50_000, 2);
        let streaming = Arc::new(StreamingExtractor::new(
            resolver,
            StreamConfig {
                streaming_threshold_bytes: 10_000,
                chunk_size_bytes: 4_096,
                ..StreamConfig::default()
            },
        ));

        let streamed = Arc::new(AtomicUsize::new(0));
        let counter = streamed.clone();
        let mut extractors = ExtractorRegistry::new();
        extractors.set_fallback(
            move |input: ExtractionInput, _ctx: &TaskContext| -> Result<RawFields, ExtractError> {
                if input.is_streaming() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                let mut total = 0u64;
                input.for_each_slice(|slice| {
                    total += slice.len() as u64;
                    Ok(())
                })?;
                let mut fields = RawFields::new();
                fields.insert("bytes".into(), total.into());
                Ok(fields)
            },
        );

        let cache = Arc::new(WholeFileCache::new(CacheConfig {
            capacity_bytes: 1 << 20,
            ttl: None,
        }));
        let mut pipeline = Pipeline::new(streaming, extractors).with_cache(cache.clone());
        if let Some(monitor) = monitor {
            pipeline = pipeline.with_monitor(monitor);
        }
        Fixture {
            pipeline,
            cache,
            streamed,
        }
    }

    #[test]
    fn small_files_go_through_the_cache() {
        let fixture = fixture(None);
        let ctx = TaskContext::standalone("small", "bin");
        let fields = fixture.pipeline.run(&task("small"), &ctx).unwrap();
        assert_eq!(fields["bytes"], 1_000);
        assert!(fixture.cache.contains(&FileRef::from("small")));
        assert_eq!(ctx.progress().current(), Some(100.0));

        fixture.pipeline.run(&task("small"), &ctx).unwrap();
        assert_eq!(fixture.cache.stats().hits, 1);
        assert_eq!(fixture.streamed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn large_files_stream_and_report_progress() {
        let fixture = fixture(None);
        let ctx = TaskContext::standalone("large", "bin");
        let fields = fixture.pipeline.run(&task("large"), &ctx).unwrap();
        assert_eq!(fields["bytes"], 50_000);
        assert_eq!(fixture.streamed.load(Ordering::SeqCst), 1);
        assert!(fixture.cache.is_empty());
        assert_eq!(ctx.progress().current(), Some(100.0));
    }

    #[test]
    fn high_pressure_streams_small_files_and_skips_the_cache() {
        let monitor = PressureMonitor::new(MonitorConfig::default());
        monitor.force_level(PressureLevel::High);
        let fixture = fixture(Some(monitor));
        let ctx = TaskContext::standalone("small", "bin");
        fixture.pipeline.run(&task("small"), &ctx).unwrap();
        assert_eq!(fixture.streamed.load(Ordering::SeqCst), 1);
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn cancelled_context_never_opens_the_file() {
        let fixture = fixture(None);
        let ctx = TaskContext::standalone("small", "bin");
        ctx.cancel_token().cancel();
        let err = fixture.pipeline.run(&task("small"), &ctx).unwrap_err();
        assert_eq!(err, ExtractError::Cancelled);
        assert!(fixture.cache.is_empty());
    }

    #[test]
    fn unresolvable_files_fail_permanently() {
        let fixture = fixture(None);
        let ctx = TaskContext::standalone("missing", "bin");
        let err = fixture.pipeline.run(&task("missing"), &ctx).unwrap_err();
        assert!(!err.is_retryable());
    }
}
