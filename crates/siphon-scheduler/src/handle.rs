use crate::progress::ProgressCell;
use crate::scheduler::Shared;
use crate::task::{AttemptRecord, ExtractionResult, ExtractionTask, TaskState, TaskStatus};
use parking_lot::{Condvar, Mutex};
use siphon_core::{
    CancellationToken, ExtractError, ExtractionStatus, FileRef, FormatHint, Priority, RawFields,
    TaskId, WorkerId,
};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Shared between a task's handle(s) and the scheduler.
pub(crate) struct TaskSlot {
    pub(crate) id: TaskId,
    pub(crate) file: FileRef,
    pub(crate) format: FormatHint,
    pub(crate) priority: Priority,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress: Arc<ProgressCell>,
    record: Mutex<SlotRecord>,
    done: Condvar,
}

struct SlotRecord {
    state: TaskState,
    worker: Option<WorkerId>,
    elapsed: Duration,
    attempt_log: Vec<AttemptRecord>,
    result: Option<ExtractionResult>,
}

impl TaskSlot {
    pub(crate) fn new(task: &ExtractionTask) -> Self {
        Self {
            id: task.id,
            file: task.file.clone(),
            format: task.format.clone(),
            priority: task.priority,
            cancel: CancellationToken::new(),
            progress: Arc::new(ProgressCell::new()),
            record: Mutex::new(SlotRecord {
                state: TaskState::Queued,
                worker: None,
                elapsed: Duration::ZERO,
                attempt_log: Vec::new(),
                result: None,
            }),
            done: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        self.record.lock().state
    }

    pub(crate) fn mark_running(&self, worker: WorkerId) {
        let mut record = self.record.lock();
        if !record.state.is_terminal() {
            record.state = TaskState::Running;
            record.worker = Some(worker);
        }
    }

    /// Log a finished attempt that will be followed by another one.
    pub(crate) fn mark_retrying(&self, attempt: AttemptRecord) {
        let mut record = self.record.lock();
        record.elapsed += attempt.elapsed;
        record.attempt_log.push(attempt);
        if !record.state.is_terminal() {
            record.state = TaskState::Retrying;
        }
    }

    /// Produce the terminal result. Returns `None` if the task already has one.
    pub(crate) fn complete(
        &self,
        status: ExtractionStatus,
        last_attempt: Option<AttemptRecord>,
        error: Option<ExtractError>,
        metadata: Option<RawFields>,
    ) -> Option<ExtractionResult> {
        let mut record = self.record.lock();
        if record.state.is_terminal() {
            return None;
        }
        if let Some(attempt) = last_attempt {
            record.elapsed += attempt.elapsed;
            record.worker = Some(attempt.worker);
            record.attempt_log.push(attempt);
        }
        let result = ExtractionResult {
            task_id: self.id,
            file: self.file.clone(),
            format: self.format.clone(),
            status,
            elapsed: record.elapsed,
            worker: record.worker,
            error,
            metadata,
            attempts: record.attempt_log.len() as u32,
            attempt_log: std::mem::take(&mut record.attempt_log),
        };
        record.state = TaskState::from(status);
        record.result = Some(result.clone());
        self.done.notify_all();
        Some(result)
    }

    fn wait(&self, deadline: Option<Instant>) -> Option<ExtractionResult> {
        let mut record = self.record.lock();
        loop {
            if let Some(result) = &record.result {
                return Some(result.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut record, deadline).timed_out() {
                        return record.result.clone();
                    }
                }
                None => self.done.wait(&mut record),
            }
        }
    }
}

/// Caller-side handle to a submitted task. Cheap to clone.
#[derive(Clone)]
pub struct TaskHandle {
    slot: Arc<TaskSlot>,
    scheduler: Weak<Shared>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.slot.id)
            .field("file", &self.slot.file)
            .field("state", &self.slot.state())
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn new(slot: Arc<TaskSlot>, scheduler: Weak<Shared>) -> Self {
        Self { slot, scheduler }
    }

    pub fn id(&self) -> TaskId {
        self.slot.id
    }

    pub fn file(&self) -> &FileRef {
        &self.slot.file
    }

    pub fn format(&self) -> &FormatHint {
        &self.slot.format
    }

    pub fn priority(&self) -> Priority {
        self.slot.priority
    }

    pub fn state(&self) -> TaskState {
        self.slot.state()
    }

    pub fn status(&self) -> TaskStatus {
        let state = self.slot.state();
        let progress_percent = match state {
            TaskState::Succeeded => Some(100.0),
            _ => self.slot.progress.get(),
        };
        TaskStatus {
            state,
            progress_percent,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.slot.state().is_terminal()
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self) -> ExtractionResult {
        loop {
            if let Some(result) = self.slot.wait(None) {
                return result;
            }
        }
    }

    /// Block for at most `timeout`; `None` if the task is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExtractionResult> {
        self.slot.wait(Some(Instant::now() + timeout))
    }

    /// The terminal result, without blocking.
    pub fn try_result(&self) -> Option<ExtractionResult> {
        self.slot.record.lock().result.clone()
    }

    /// Request cancellation. Returns `false` if the task had already finished.
    ///
    /// A queued or backing-off task completes as `Cancelled` immediately; a
    /// running one stops at its next chunk boundary.
    pub fn cancel(&self) -> bool {
        if self.slot.state().is_terminal() {
            return false;
        }
        self.slot.cancel.cancel();
        if let Some(shared) = self.scheduler.upgrade() {
            shared.cancel_pending(&self.slot);
        }
        true
    }
}
