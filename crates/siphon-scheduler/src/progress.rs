use siphon_core::{ExtractionStatus, FileRef, FormatHint, TaskId, WorkerId};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Task progress as published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Begin {
        task_id: TaskId,
        file: FileRef,
        format: FormatHint,
        worker: WorkerId,
        attempt: u32,
    },
    Report {
        task_id: TaskId,
        percentage: Option<u32>,
    },
    End {
        task_id: TaskId,
        status: ExtractionStatus,
    },
}

impl ProgressEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            ProgressEvent::Begin { task_id, .. }
            | ProgressEvent::Report { task_id, .. }
            | ProgressEvent::End { task_id, .. } => *task_id,
        }
    }
}

pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

/// Fan-out of progress events. Sends never block; with no subscribers they are dropped.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> ProgressReceiver {
        self.tx.subscribe()
    }

    pub(crate) fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

const NO_PROGRESS: u64 = u64::MAX;
const NO_PERCENT: u32 = u32::MAX;

/// Last reported progress of a task's running attempt.
#[derive(Debug)]
pub(crate) struct ProgressCell {
    bits: AtomicU64,
    last_whole: AtomicU32,
}

impl ProgressCell {
    pub(crate) fn new() -> Self {
        Self {
            bits: AtomicU64::new(NO_PROGRESS),
            last_whole: AtomicU32::new(NO_PERCENT),
        }
    }

    pub(crate) fn get(&self) -> Option<f64> {
        match self.bits.load(Ordering::Acquire) {
            NO_PROGRESS => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Store `percent`; returns the whole percentage if it changed since the last store.
    fn set(&self, percent: f64) -> Option<u32> {
        let percent = percent.clamp(0.0, 100.0);
        self.bits.store(percent.to_bits(), Ordering::Release);
        let whole = percent as u32;
        let previous = self.last_whole.swap(whole, Ordering::AcqRel);
        (previous != whole).then_some(whole)
    }

    pub(crate) fn reset(&self) {
        self.bits.store(NO_PROGRESS, Ordering::Release);
        self.last_whole.store(NO_PERCENT, Ordering::Release);
    }
}

/// Handed to extractors (through the task context) to publish progress.
///
/// `Report` events are only sent when the whole percentage changes.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    cell: Arc<ProgressCell>,
    sender: Option<ProgressSender>,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: TaskId, cell: Arc<ProgressCell>, sender: ProgressSender) -> Self {
        Self {
            task_id,
            cell,
            sender: Some(sender),
        }
    }

    /// A reporter that records nothing anywhere.
    pub fn detached(task_id: TaskId) -> Self {
        Self {
            task_id,
            cell: Arc::new(ProgressCell::new()),
            sender: None,
        }
    }

    pub fn report(&self, percent: f64) {
        if let Some(whole) = self.cell.set(percent) {
            if let Some(sender) = &self.sender {
                sender.send(ProgressEvent::Report {
                    task_id: self.task_id,
                    percentage: Some(whole),
                });
            }
        }
    }

    pub fn current(&self) -> Option<f64> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_throttled_to_whole_percent_changes() {
        let sender = ProgressSender::new(16);
        let mut rx = sender.subscribe();
        let cell = Arc::new(ProgressCell::new());
        let reporter = ProgressReporter::new(TaskId::from_raw(9), cell.clone(), sender);

        reporter.report(10.2);
        reporter.report(10.7);
        reporter.report(11.0);
        reporter.report(250.0);

        let percentages: Vec<Option<u32>> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| match event {
                ProgressEvent::Report { percentage, .. } => percentage,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(percentages, vec![Some(10), Some(11), Some(100)]);
        assert_eq!(cell.get(), Some(100.0));

        cell.reset();
        assert_eq!(reporter.current(), None);
    }

    #[test]
    fn sending_without_subscribers_is_harmless() {
        let sender = ProgressSender::new(1);
        sender.send(ProgressEvent::End {
            task_id: TaskId::from_raw(1),
            status: ExtractionStatus::Success,
        });
        let reporter = ProgressReporter::detached(TaskId::from_raw(2));
        reporter.report(50.0);
        assert_eq!(reporter.current(), Some(50.0));
    }
}
