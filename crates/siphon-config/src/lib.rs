//! Configuration for Siphon.
//!
//! [`SiphonConfig`] is loaded from TOML; every section and key is optional and
//! falls back to the defaults of the component it configures. The `to_*`
//! helpers turn sections into the component configs the engine is built from.
//! [`init_tracing`] installs the process-wide `tracing` subscriber.

mod diagnostics;
mod logging;
mod validation;

pub use diagnostics::{ConfigDiagnostics, ConfigValidationError, ConfigWarning};
pub use logging::init_tracing;

use serde::{Deserialize, Serialize};
use siphon_cache::CacheConfig;
use siphon_memory::{MonitorConfig, PressureThresholds, SystemSampler};
use siphon_metrics::ExtractionMetrics;
use siphon_scheduler::{BalancingStrategy, ExecutionModel, SchedulerConfig};
use siphon_stream::{ReaderKind, ReaderTable, StreamConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming a config file for [`SiphonConfig::load_from_env`].
pub const CONFIG_ENV_VAR: &str = "SIPHON_CONFIG";

/// A byte count written either as an integer or as a string with a unit
/// (`"512MiB"`, `"100MB"`, `"2G"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub const fn bytes(self) -> u64 {
        self.0
    }
}

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => siphon_memory::parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiphonConfig {
    pub logging: LoggingConfig,
    pub memory: MemorySection,
    pub cache: CacheSection,
    pub stream: StreamSection,
    pub scheduler: SchedulerSection,
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    pub level: String,
    pub json: bool,
    pub stderr: bool,
    /// Append logs to this file as well. An unopenable file disables only this sink.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return "info".to_owned();
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            "off" | "none" => "off".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The configured filter, with `RUST_LOG` directives appended when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                tracing_subscriber::EnvFilter::try_new(format!("{config_directives},{env_directives}"))
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub sample_interval_ms: u64,
    pub history_len: usize,
    pub stale_after_failures: u32,
    /// Percent of memory in use at which each level begins.
    pub elevated_percent: f64,
    pub high_percent: f64,
    pub critical_percent: f64,
    /// Treat this as total memory when it is lower than what the host reports.
    pub limit_bytes: Option<ByteSize>,
    /// Use the enclosing cgroup's limit and usage when one applies.
    pub prefer_cgroup: bool,
}

impl Default for MemorySection {
    fn default() -> Self {
        let monitor = MonitorConfig::default();
        Self {
            sample_interval_ms: monitor.interval.as_millis() as u64,
            history_len: monitor.history_len,
            stale_after_failures: monitor.stale_after_failures,
            elevated_percent: monitor.thresholds.elevated,
            high_percent: monitor.thresholds.high,
            critical_percent: monitor.thresholds.critical,
            limit_bytes: None,
            prefer_cgroup: true,
        }
    }
}

impl MemorySection {
    pub fn thresholds(&self) -> PressureThresholds {
        PressureThresholds {
            elevated: self.elevated_percent,
            high: self.high_percent,
            critical: self.critical_percent,
        }
    }

    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            history_len: self.history_len.max(1),
            stale_after_failures: self.stale_after_failures.max(1),
            thresholds: self.thresholds(),
        }
    }

    pub fn to_sampler(&self) -> SystemSampler {
        SystemSampler::new()
            .with_limit(self.limit_bytes.map(ByteSize::bytes))
            .with_cgroup(self.prefer_cgroup)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Capacity at normal memory pressure.
    pub capacity_bytes: ByteSize,
    /// Entry lifetime from insertion; unset keeps entries until evicted.
    pub ttl_ms: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity_bytes: ByteSize(CacheConfig::default().capacity_bytes),
            ttl_ms: None,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity_bytes: self.capacity_bytes.bytes(),
            ttl: self.ttl_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub streaming_threshold_bytes: ByteSize,
    pub chunk_size_bytes: ByteSize,
    pub max_records_per_chunk: usize,
    /// Start from the built-in format table before applying `formats`.
    pub default_formats: bool,
    /// Format hint to reader kind (`generic`, `lines`, `riff`, `iso_bmff`, `png`).
    pub formats: BTreeMap<String, String>,
}

impl Default for StreamSection {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            streaming_threshold_bytes: ByteSize(stream.streaming_threshold_bytes),
            chunk_size_bytes: ByteSize(stream.chunk_size_bytes as u64),
            max_records_per_chunk: stream.max_records_per_chunk,
            default_formats: true,
            formats: BTreeMap::new(),
        }
    }
}

impl StreamSection {
    /// Entries naming an unknown reader kind are skipped; [`SiphonConfig::validate`]
    /// reports them.
    pub fn reader_table(&self) -> ReaderTable {
        let mut table = if self.default_formats {
            ReaderTable::default()
        } else {
            ReaderTable::empty()
        };
        for (format, kind) in &self.formats {
            match kind.parse::<ReaderKind>() {
                Ok(kind) => table.set(format.as_str(), kind),
                Err(err) => tracing::warn!(
                    target = "siphon.config",
                    format = %format,
                    error = %err,
                    "ignoring stream format mapping"
                ),
            }
        }
        table
    }

    pub fn to_stream_config(&self) -> StreamConfig {
        StreamConfig {
            streaming_threshold_bytes: self.streaming_threshold_bytes.bytes(),
            chunk_size_bytes: usize::try_from(self.chunk_size_bytes.bytes())
                .unwrap_or(usize::MAX)
                .max(1),
            max_records_per_chunk: self.max_records_per_chunk.max(1),
            readers: self.reader_table(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Worker count; unset uses the available parallelism.
    pub workers: Option<usize>,
    pub execution_model: ExecutionModel,
    pub strategy: BalancingStrategy,
    /// Per-attempt limit for tasks without their own; `0` disables it.
    pub default_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub queue_capacity: usize,
    pub progress_channel_capacity: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        Self {
            workers: None,
            execution_model: scheduler.execution_model,
            strategy: scheduler.strategy,
            default_timeout_ms: scheduler
                .default_timeout
                .map_or(0, |timeout| timeout.as_millis() as u64),
            max_retries: scheduler.max_retries,
            backoff_base_ms: scheduler.backoff_base.as_millis() as u64,
            backoff_cap_ms: scheduler.backoff_cap.as_millis() as u64,
            queue_capacity: scheduler.queue_capacity,
            progress_channel_capacity: scheduler.progress_channel_capacity,
        }
    }
}

impl SchedulerSection {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            workers: self.workers.unwrap_or(defaults.workers).max(1),
            execution_model: self.execution_model,
            strategy: self.strategy,
            default_timeout: (self.default_timeout_ms > 0)
                .then(|| Duration::from_millis(self.default_timeout_ms)),
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms.max(self.backoff_base_ms)),
            queue_capacity: self.queue_capacity.max(1),
            progress_channel_capacity: self.progress_channel_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// Per-format entries kept before new formats are counted as `other`.
    pub max_formats: usize,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            max_formats: siphon_metrics::DEFAULT_MAX_FORMATS,
        }
    }
}

impl MetricsSection {
    pub fn to_metrics(&self) -> ExtractionMetrics {
        ExtractionMetrics::with_max_formats(self.max_formats)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ConfigValidationError>),
}

fn join_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Strip user-supplied values out of a TOML/serde error message.
///
/// Quoted strings become `"<redacted>"`; backticked keys and variants after
/// `unknown field`/`unknown variant`, and the offending scalar of an
/// `invalid type`/`invalid value` error, become `<redacted>`.
fn sanitize_toml_error_message(message: &str) -> String {
    static DOUBLE_QUOTED: OnceLock<Option<regex::Regex>> = OnceLock::new();
    static SINGLE_QUOTED: OnceLock<Option<regex::Regex>> = OnceLock::new();
    static BACKTICKED_INPUT: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let mut out = message.to_owned();
    if let Some(re) = DOUBLE_QUOTED
        .get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok())
        .as_ref()
    {
        out = re.replace_all(&out, r#""<redacted>""#).into_owned();
    }
    if let Some(re) = SINGLE_QUOTED
        .get_or_init(|| regex::Regex::new(r"'(?:\\.|[^'\\])*'").ok())
        .as_ref()
    {
        out = re.replace_all(&out, "'<redacted>'").into_owned();
    }
    if let Some(re) = BACKTICKED_INPUT
        .get_or_init(|| {
            regex::Regex::new(
                r"(unknown field|unknown variant|invalid type: [a-z ]+|invalid value: [a-z ]+) `[^`]*`",
            )
            .ok()
        })
        .as_ref()
    {
        out = re.replace_all(&out, "$1 `<redacted>`").into_owned();
    }
    out
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The `Display` form quotes the offending source line; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl SiphonConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load and report unknown keys plus semantic problems alongside the config.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<SiphonConfig>(text)?;
        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.extend_validation(config.validate());
        Ok((config, diagnostics))
    }

    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str_with_diagnostics(&text)
    }

    /// Load the file named by [`CONFIG_ENV_VAR`], or the defaults when it is unset.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            Some(path) => Self::load_from_path(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    /// `Err` when validation reports any error; warnings are logged.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let diagnostics = self.validate();
        for warning in &diagnostics.warnings {
            tracing::warn!(target = "siphon.config", warning = %warning, "configuration warning");
        }
        if diagnostics.errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(diagnostics.errors))
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        self.memory.to_monitor_config()
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache.to_cache_config()
    }

    pub fn stream_config(&self) -> StreamConfig {
        self.stream.to_stream_config()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        self.scheduler.to_scheduler_config()
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
