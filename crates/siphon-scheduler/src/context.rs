use crate::progress::ProgressReporter;
use siphon_core::{CancellationToken, ExtractError, FileRef, FormatHint, TaskId, WorkerId};
use siphon_stream::{ProgressUpdate, StreamOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-attempt context handed to the task body.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    file: FileRef,
    format: FormatHint,
    attempt: u32,
    worker: WorkerId,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    progress: ProgressReporter,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task_id: TaskId,
        file: FileRef,
        format: FormatHint,
        attempt: u32,
        worker: WorkerId,
        cancel: CancellationToken,
        deadline: Option<Instant>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            task_id,
            file,
            format,
            attempt,
            worker,
            cancel,
            deadline,
            progress,
        }
    }

    /// A context outside any scheduler, for running extractors directly.
    pub fn standalone(file: impl Into<FileRef>, format: impl Into<FormatHint>) -> Self {
        let task_id = TaskId::next();
        Self::new(
            task_id,
            file.into(),
            format.into(),
            1,
            WorkerId(0),
            CancellationToken::new(),
            None,
            ProgressReporter::detached(task_id),
        )
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    pub fn format(&self) -> &FormatHint {
        &self.format
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// `Err` once the attempt was cancelled or ran past its deadline.
    pub fn check(&self) -> Result<(), ExtractError> {
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled);
        }
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Err(ExtractError::DeadlineExceeded(
                self.deadline
                    .map(|deadline| deadline.elapsed())
                    .unwrap_or_default(),
            )),
            _ => Ok(()),
        }
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn report_progress(&self, percent: f64) {
        self.progress.report(percent);
    }

    /// Stream options carrying this attempt's cancellation, deadline and
    /// progress reporting.
    pub fn stream_options(&self) -> StreamOptions {
        let reporter = self.progress.clone();
        let mut options = StreamOptions::default()
            .with_cancel(self.cancel.clone())
            .with_observer(Arc::new(move |update: &ProgressUpdate| {
                if let Some(percent) = update.percent {
                    reporter.report(percent);
                }
            }));
        options.deadline = self.deadline;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_cancellation_before_deadline() {
        let ctx = TaskContext::standalone("f", "bin").with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(ExtractError::DeadlineExceeded(_))));
        ctx.cancel_token().cancel();
        assert_eq!(ctx.check(), Err(ExtractError::Cancelled));
    }

    #[test]
    fn stream_options_share_the_token() {
        let ctx = TaskContext::standalone("f", "bin");
        let options = ctx.stream_options();
        ctx.cancel_token().cancel();
        assert!(options.cancel.is_cancelled());
        assert!(options.deadline.is_none());
        assert!(ctx.check().is_err());
    }
}
