//! Aggregate metrics over terminal extraction results.
//!
//! Every terminal result updates the registry under one lock, so concurrent
//! workers never lose counts. Latencies go into HDR histograms per format and
//! are summarised as p50/p95/max in microseconds.
//!
//! Format hints come from callers, so the number of per-format entries is
//! capped; hints seen after the cap is reached are counted under
//! [`OTHER_FORMAT`].

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use siphon_core::ExtractionStatus;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const LATENCY_SIGFIG: u8 = 3;
// One hour. Longer latencies are clamped.
const MAX_LATENCY_US: u64 = 60 * 60 * 1_000_000;

/// Default cap on per-format entries, [`OTHER_FORMAT`] included.
pub const DEFAULT_MAX_FORMATS: usize = 64;

/// Bucket for formats first seen after the per-format cap was reached.
pub const OTHER_FORMAT: &str = "other";

#[derive(Debug)]
pub struct ExtractionMetrics {
    started: Instant,
    max_formats: usize,
    inner: Mutex<HashMap<String, FormatCounters>>,
}

impl Default for ExtractionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct FormatCounters {
    count: u64,
    success: u64,
    failed: u64,
    timed_out: u64,
    cancelled: u64,
    retried: u64,
    attempts: u64,
    // `None` only if the histogram could not be allocated.
    latency_us: Option<Histogram<u64>>,
}

fn new_histogram() -> Option<Histogram<u64>> {
    static BOUNDS_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    match Histogram::<u64>::new_with_bounds(1, MAX_LATENCY_US, LATENCY_SIGFIG) {
        Ok(histogram) => Some(histogram),
        Err(err) => {
            if BOUNDS_ERROR_LOGGED.set(()).is_ok() {
                tracing::debug!(
                    target = "siphon.metrics",
                    error = %err,
                    "failed to construct latency histogram; latencies will not be recorded"
                );
            }
            None
        }
    }
}

impl FormatCounters {
    fn new() -> Self {
        Self {
            count: 0,
            success: 0,
            failed: 0,
            timed_out: 0,
            cancelled: 0,
            retried: 0,
            attempts: 0,
            latency_us: new_histogram(),
        }
    }

    fn snapshot(&self) -> FormatMetrics {
        FormatMetrics {
            count: self.count,
            success: self.success,
            failed: self.failed,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            retried: self.retried,
            attempts: self.attempts,
            latency_us: self
                .latency_us
                .as_ref()
                .map(latency_summary)
                .unwrap_or_default(),
        }
    }
}

impl ExtractionMetrics {
    pub fn new() -> Self {
        Self::with_max_formats(DEFAULT_MAX_FORMATS)
    }

    /// At most `max_formats` entries (minimum 1) appear in a snapshot.
    pub fn with_max_formats(max_formats: usize) -> Self {
        Self {
            started: Instant::now(),
            max_formats: max_formats.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_formats(&self) -> usize {
        self.max_formats
    }

    fn counters<'a>(
        &self,
        inner: &'a mut HashMap<String, FormatCounters>,
        format: &str,
    ) -> &'a mut FormatCounters {
        static OVERFLOW_LOGGED: OnceLock<()> = OnceLock::new();

        // The last slot is kept for the overflow bucket.
        let key = if inner.contains_key(format) || inner.len() + 1 < self.max_formats {
            format
        } else {
            if OVERFLOW_LOGGED.set(()).is_ok() {
                tracing::debug!(
                    target = "siphon.metrics",
                    format,
                    max_formats = self.max_formats,
                    "per-format metrics are full; counting further formats as `other`"
                );
            }
            OTHER_FORMAT
        };
        inner
            .entry(key.to_owned())
            .or_insert_with(FormatCounters::new)
    }

    /// Record one terminal result for `format`.
    ///
    /// `attempts` counts every execution of the task, including the last one.
    pub fn record_result(
        &self,
        format: &str,
        status: ExtractionStatus,
        elapsed: Duration,
        attempts: u32,
    ) {
        static RECORD_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        let micros = elapsed.as_micros().min(u128::from(MAX_LATENCY_US)) as u64;
        let micros = micros.max(1);

        let mut inner = self.inner.lock();
        let counters = self.counters(&mut inner, format);
        match status {
            ExtractionStatus::Success => counters.success += 1,
            ExtractionStatus::Failed => counters.failed += 1,
            ExtractionStatus::TimedOut => counters.timed_out += 1,
            ExtractionStatus::Cancelled => counters.cancelled += 1,
            // Not terminal.
            ExtractionStatus::Retried => {
                counters.retried += 1;
                return;
            }
        }
        counters.count = counters.count.saturating_add(1);
        counters.attempts = counters.attempts.saturating_add(u64::from(attempts));
        if let Some(histogram) = counters.latency_us.as_mut() {
            if let Err(err) = histogram.record(micros) {
                if RECORD_ERROR_LOGGED.set(()).is_ok() {
                    tracing::debug!(
                        target = "siphon.metrics",
                        format,
                        micros,
                        error = %err,
                        "failed to record latency sample"
                    );
                }
            }
        }
    }

    /// Record that a failed attempt was queued again.
    pub fn record_retry(&self, format: &str) {
        let mut inner = self.inner.lock();
        let counters = self.counters(&mut inner, format);
        counters.retried = counters.retried.saturating_add(1);
    }

    pub fn reset(&self) {
        self.inner.lock().clear();
    }

    pub fn snapshot(&self) -> AggregateMetrics {
        static MERGE_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

        let inner = self.inner.lock();
        let mut formats = BTreeMap::new();
        let mut totals = FormatCounters::new();

        for (format, counters) in inner.iter() {
            totals.count += counters.count;
            totals.success += counters.success;
            totals.failed += counters.failed;
            totals.timed_out += counters.timed_out;
            totals.cancelled += counters.cancelled;
            totals.retried += counters.retried;
            totals.attempts += counters.attempts;
            if let (Some(total), Some(histogram)) =
                (totals.latency_us.as_mut(), counters.latency_us.as_ref())
            {
                if let Err(err) = total.add(histogram) {
                    if MERGE_ERROR_LOGGED.set(()).is_ok() {
                        tracing::debug!(
                            target = "siphon.metrics",
                            format = format.as_str(),
                            error = %err,
                            "failed to merge per-format latency histogram into totals"
                        );
                    }
                }
            }
            formats.insert(format.clone(), counters.snapshot());
        }
        drop(inner);

        let uptime = self.started.elapsed();
        let seconds = uptime.as_secs_f64();
        let throughput_per_sec = if seconds > 0.0 {
            totals.count as f64 / seconds
        } else {
            0.0
        };

        AggregateMetrics {
            totals: totals.snapshot(),
            formats,
            throughput_per_sec,
            uptime_ms: uptime.as_millis() as u64,
        }
    }
}

fn latency_summary(hist: &Histogram<u64>) -> LatencySummary {
    if hist.is_empty() {
        return LatencySummary::default();
    }

    LatencySummary {
        p50_us: hist.value_at_quantile(0.50),
        p95_us: hist.value_at_quantile(0.95),
        max_us: hist.max(),
    }
}

/// Read-only snapshot of [`ExtractionMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub totals: FormatMetrics,
    pub formats: BTreeMap<String, FormatMetrics>,
    /// Terminal results per second since the registry was created.
    pub throughput_per_sec: f64,
    pub uptime_ms: u64,
}

impl AggregateMetrics {
    pub fn format(&self, format: &str) -> Option<&FormatMetrics> {
        self.formats.get(format)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatMetrics {
    /// Terminal results.
    pub count: u64,
    pub success: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Attempts that failed and were queued again.
    pub retried: u64,
    pub attempts: u64,
    pub latency_us: LatencySummary,
}

impl FormatMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.success as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50_us: u64,
    pub p95_us: u64,
    pub max_us: u64,
}
