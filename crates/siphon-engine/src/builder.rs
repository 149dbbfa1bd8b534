use crate::engine::ExtractionEngine;
use crate::error::EngineError;
use siphon_config::SiphonConfig;
use siphon_core::FormatHint;
use siphon_memory::{MemorySampler, PressureMonitor};
use siphon_scheduler::{
    ExtractorRegistry, FieldExtractor, LoadBalancer, Pipeline, Scheduler, WholeFileCache,
};
use siphon_stream::{FileResolver, FsResolver, StreamingExtractor};
use std::sync::Arc;

/// Collects the collaborators an [`ExtractionEngine`] needs beyond its config.
///
/// Without overrides the engine reads paths from the local filesystem and
/// samples host memory; formats without a registered extractor fail as
/// unsupported.
pub struct EngineBuilder {
    config: SiphonConfig,
    resolver: Option<Arc<dyn FileResolver>>,
    extractors: ExtractorRegistry,
    sampler: Option<Arc<dyn MemorySampler>>,
    balancer: Option<Box<dyn LoadBalancer>>,
    install_tracing: bool,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("resolver", &self.resolver.is_some())
            .field("extractors", &self.extractors)
            .field("sampler", &self.sampler.is_some())
            .field("balancer", &self.balancer.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl EngineBuilder {
    pub(crate) fn new(config: SiphonConfig) -> Self {
        Self {
            config,
            resolver: None,
            extractors: ExtractorRegistry::new(),
            sampler: None,
            balancer: None,
            install_tracing: false,
        }
    }

    pub fn resolver(mut self, resolver: impl FileResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    pub fn resolver_shared(mut self, resolver: Arc<dyn FileResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn extractor(
        mut self,
        format: impl Into<FormatHint>,
        extractor: impl FieldExtractor + 'static,
    ) -> Self {
        self.extractors.register(format, extractor);
        self
    }

    /// Used for formats with no extractor of their own.
    pub fn default_extractor(mut self, extractor: impl FieldExtractor + 'static) -> Self {
        self.extractors.set_fallback(extractor);
        self
    }

    pub fn extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Replace the balancer named by `scheduler.strategy`.
    pub fn balancer(mut self, balancer: Box<dyn LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Install the global subscriber from `[logging]` while building.
    pub fn install_tracing(mut self, install: bool) -> Self {
        self.install_tracing = install;
        self
    }

    /// Build the engine without starting background memory sampling.
    ///
    /// The pressure level stays `Normal` until [`PressureMonitor::sample_now`],
    /// [`PressureMonitor::force_level`] or [`PressureMonitor::start`] is used.
    pub fn build(self) -> Result<ExtractionEngine, EngineError> {
        let config = self.config.validated()?;
        if self.install_tracing {
            siphon_config::init_tracing(&config.logging);
        }

        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(config.memory.to_sampler()));
        let monitor = PressureMonitor::with_sampler(config.monitor_config(), sampler);
        let cache = WholeFileCache::with_monitor(config.cache_config(), &monitor);

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(FsResolver::new()));
        let streaming = Arc::new(StreamingExtractor::new(resolver, config.stream_config()));
        let pipeline = Pipeline::new(streaming, self.extractors)
            .with_cache(Arc::clone(&cache))
            .with_monitor(monitor.clone());

        let metrics = Arc::new(config.metrics.to_metrics());
        let mut scheduler = Scheduler::builder(config.scheduler_config()).metrics(Arc::clone(&metrics));
        if let Some(balancer) = self.balancer {
            scheduler = scheduler.balancer(balancer);
        }
        let scheduler = scheduler.build(Arc::new(pipeline))?;

        tracing::info!(
            target = "siphon.engine",
            workers = scheduler.worker_count(),
            model = scheduler.config().execution_model.as_str(),
            strategy = scheduler.config().strategy.as_str(),
            cache_bytes = config.cache.capacity_bytes.bytes(),
            streaming_threshold = config.stream.streaming_threshold_bytes.bytes(),
            "extraction engine ready"
        );
        Ok(ExtractionEngine::assemble(config, monitor, cache, metrics, scheduler))
    }

    /// Build the engine and start background memory sampling.
    pub fn start(self) -> Result<ExtractionEngine, EngineError> {
        let engine = self.build()?;
        engine.monitor().start()?;
        Ok(engine)
    }
}
