use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Invoked after every yielded chunk.
pub type ProgressObserver = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub sequence: u64,
    pub bytes_consumed: u64,
    pub bytes_total: Option<u64>,
    pub records_consumed: u64,
    /// `None` when the total size is unknown.
    pub percent: Option<f64>,
}

/// Counters shared between a [`crate::ChunkStream`] and anyone polling it.
#[derive(Debug)]
pub struct StreamProgress {
    bytes_total: Option<u64>,
    bytes_consumed: AtomicU64,
    chunks: AtomicU64,
    records: AtomicU64,
    finished: AtomicBool,
}

impl StreamProgress {
    pub(crate) fn new(bytes_total: Option<u64>) -> Self {
        Self {
            bytes_total,
            bytes_consumed: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            records: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn bytes_total(&self) -> Option<u64> {
        self.bytes_total
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed.load(Ordering::Acquire)
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Acquire)
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Acquire)
    }

    /// The final chunk has been yielded.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn percent(&self) -> Option<f64> {
        if self.is_finished() {
            return Some(100.0);
        }
        percent_of(self.bytes_consumed(), self.bytes_total)
    }

    pub(crate) fn advance(&self, bytes: u64, records: u64, is_final: bool) -> ProgressUpdate {
        let sequence = self.chunks.fetch_add(1, Ordering::AcqRel);
        let bytes_consumed = self.bytes_consumed.fetch_add(bytes, Ordering::AcqRel) + bytes;
        let records_consumed = self.records.fetch_add(records, Ordering::AcqRel) + records;
        if is_final {
            self.finished.store(true, Ordering::Release);
        }
        ProgressUpdate {
            sequence,
            bytes_consumed,
            bytes_total: self.bytes_total,
            records_consumed,
            percent: if is_final {
                Some(100.0)
            } else {
                percent_of(bytes_consumed, self.bytes_total)
            },
        }
    }
}

fn percent_of(consumed: u64, total: Option<u64>) -> Option<f64> {
    match total {
        Some(0) => Some(0.0),
        Some(total) => Some(((consumed as f64) * 100.0 / (total as f64)).min(100.0)),
        None => None,
    }
}
