use crate::diagnostics::{ConfigDiagnostics, ConfigValidationError, ConfigWarning};
use crate::{LoggingConfig, SiphonConfig};
use siphon_stream::ReaderKind;

impl SiphonConfig {
    /// Check semantic invariants, reporting every problem found in one pass.
    #[must_use]
    pub fn validate(&self) -> ConfigDiagnostics {
        let mut out = ConfigDiagnostics::default();
        validate_logging(self, &mut out);
        validate_memory(self, &mut out);
        validate_cache(self, &mut out);
        validate_stream(self, &mut out);
        validate_scheduler(self, &mut out);
        validate_metrics(self, &mut out);
        out
    }
}

fn validate_logging(config: &SiphonConfig, out: &mut ConfigDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }

    if let Some(path) = &config.logging.file {
        let missing_parent = path
            .parent()
            .is_some_and(|parent| !parent.as_os_str().is_empty() && !parent.is_dir());
        if missing_parent {
            out.warnings.push(ConfigWarning::LogFileDirectoryMissing { path: path.clone() });
        }
    }
}

fn validate_memory(config: &SiphonConfig, out: &mut ConfigDiagnostics) {
    let memory = &config.memory;
    if memory.sample_interval_ms == 0 {
        out.errors.push(ConfigValidationError::invalid(
            "memory.sample_interval_ms",
            "must be >= 1",
        ));
    }
    if memory.history_len == 0 {
        out.errors
            .push(ConfigValidationError::invalid("memory.history_len", "must be >= 1"));
    }
    if memory.stale_after_failures == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "memory.stale_after_failures".to_owned(),
            message: "must be >= 1; using 1".to_owned(),
        });
    }

    for (path, value) in [
        ("memory.elevated_percent", memory.elevated_percent),
        ("memory.high_percent", memory.high_percent),
        ("memory.critical_percent", memory.critical_percent),
    ] {
        if !value.is_finite() || value <= 0.0 || value > 100.0 {
            out.errors.push(ConfigValidationError::invalid(
                path,
                format!("must be within (0, 100], got {value}"),
            ));
        }
    }
    if !(memory.elevated_percent < memory.high_percent
        && memory.high_percent < memory.critical_percent)
    {
        out.errors.push(ConfigValidationError::invalid(
            "memory",
            "thresholds must satisfy elevated_percent < high_percent < critical_percent",
        ));
    }

    if matches!(memory.limit_bytes, Some(limit) if limit.bytes() == 0) {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "memory.limit_bytes".to_owned(),
            message: "0 is ignored; the host total is used".to_owned(),
        });
    }
}

fn validate_cache(config: &SiphonConfig, out: &mut ConfigDiagnostics) {
    if config.cache.capacity_bytes.bytes() == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "cache.capacity_bytes".to_owned(),
            message: "0 disables whole-file caching".to_owned(),
        });
    }
    if config.cache.ttl_ms == Some(0) {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "cache.ttl_ms".to_owned(),
            message: "0 means entries never expire".to_owned(),
        });
    }
}

fn validate_stream(config: &SiphonConfig, out: &mut ConfigDiagnostics) {
    let stream = &config.stream;
    if stream.chunk_size_bytes.bytes() == 0 {
        out.errors.push(ConfigValidationError::invalid(
            "stream.chunk_size_bytes",
            "must be >= 1",
        ));
    }
    if stream.max_records_per_chunk == 0 {
        out.errors.push(ConfigValidationError::invalid(
            "stream.max_records_per_chunk",
            "must be >= 1",
        ));
    }
    for (format, kind) in &stream.formats {
        if let Err(err) = kind.parse::<ReaderKind>() {
            out.errors.push(ConfigValidationError::invalid(
                &format!("stream.formats.{format}"),
                err.to_string(),
            ));
        }
    }
}

fn validate_scheduler(config: &SiphonConfig, out: &mut ConfigDiagnostics) {
    let scheduler = &config.scheduler;
    if scheduler.workers == Some(0) {
        out.errors
            .push(ConfigValidationError::invalid("scheduler.workers", "must be >= 1"));
    }
    if scheduler.backoff_cap_ms < scheduler.backoff_base_ms {
        out.errors.push(ConfigValidationError::invalid(
            "scheduler.backoff_cap_ms",
            format!(
                "must be >= scheduler.backoff_base_ms ({})",
                scheduler.backoff_base_ms
            ),
        ));
    }
    if scheduler.queue_capacity == 0 {
        out.errors.push(ConfigValidationError::invalid(
            "scheduler.queue_capacity",
            "must be >= 1",
        ));
    }
    if scheduler.progress_channel_capacity == 0 {
        out.errors.push(ConfigValidationError::invalid(
            "scheduler.progress_channel_capacity",
            "must be >= 1",
        ));
    }
}

fn validate_metrics(config: &SiphonConfig, out: &mut ConfigDiagnostics) {
    if config.metrics.max_formats == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "metrics.max_formats".to_owned(),
            message: "must be >= 1; using 1".to_owned(),
        });
    }
}
