use serde::Serialize;
use siphon_core::{
    ExtractError, ExtractionStatus, FileRef, FormatHint, Priority, RawFields, TaskId, WorkerId,
};
use std::time::{Duration, SystemTime};

/// What a caller submits. Unset limits inherit the scheduler defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub file: FileRef,
    pub format: FormatHint,
    pub priority: Priority,
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(file: impl Into<FileRef>, format: impl Into<FormatHint>) -> Self {
        Self {
            file: file.into(),
            format: format.into(),
            priority: Priority::default(),
            max_retries: None,
            timeout: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A submitted unit of work. Only `retry_count` changes after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionTask {
    pub id: TaskId,
    pub file: FileRef,
    pub format: FormatHint,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub submitted_at: SystemTime,
    /// Per-attempt execution limit; `None` runs without a deadline.
    pub timeout: Option<Duration>,
}

impl ExtractionTask {
    /// 1-based number of the attempt about to run.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Lifecycle of a task as seen through its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::TimedOut | TaskState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl From<ExtractionStatus> for TaskState {
    fn from(status: ExtractionStatus) -> Self {
        match status {
            ExtractionStatus::Success => TaskState::Succeeded,
            ExtractionStatus::Failed => TaskState::Failed,
            ExtractionStatus::Retried => TaskState::Retrying,
            ExtractionStatus::TimedOut => TaskState::TimedOut,
            ExtractionStatus::Cancelled => TaskState::Cancelled,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Progress of the current attempt, when its input size is known.
    pub progress_percent: Option<f64>,
}

/// One execution of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub worker: WorkerId,
    /// `Retried` for attempts that were followed by another one.
    pub status: ExtractionStatus,
    pub elapsed: Duration,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExtractError>,
}

/// The terminal outcome of a task, produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub task_id: TaskId,
    pub file: FileRef,
    pub format: FormatHint,
    pub status: ExtractionStatus,
    /// Execution time summed over all attempts.
    pub elapsed: Duration,
    /// Worker of the last attempt; `None` if the task never ran.
    pub worker: Option<WorkerId>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ExtractError>,
    pub metadata: Option<RawFields>,
    pub attempts: u32,
    pub attempt_log: Vec<AttemptRecord>,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }
}

fn serialize_error<S>(error: &Option<ExtractError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(error) => serializer.collect_str(error),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_leaves_limits_to_defaults() {
        let spec = TaskSpec::new("a.wav", "WAV").priority(Priority::High);
        assert_eq!(spec.format.as_str(), "wav");
        assert_eq!(spec.priority, Priority::High);
        assert_eq!(spec.max_retries, None);
        assert_eq!(spec.timeout, None);
    }

    #[test]
    fn terminal_states_match_statuses() {
        for status in [
            ExtractionStatus::Success,
            ExtractionStatus::Failed,
            ExtractionStatus::TimedOut,
            ExtractionStatus::Cancelled,
        ] {
            assert!(TaskState::from(status).is_terminal());
        }
        assert!(!TaskState::from(ExtractionStatus::Retried).is_terminal());
        assert!(!TaskState::Queued.is_terminal());
    }

    #[test]
    fn results_serialize_errors_as_messages() {
        let result = ExtractionResult {
            task_id: TaskId::from_raw(3),
            file: "f".into(),
            format: FormatHint::generic(),
            status: ExtractionStatus::Failed,
            elapsed: Duration::from_millis(2),
            worker: Some(WorkerId(0)),
            error: Some(ExtractError::permanent("bad header")),
            metadata: None,
            attempts: 1,
            attempt_log: Vec::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "bad header");
    }
}
