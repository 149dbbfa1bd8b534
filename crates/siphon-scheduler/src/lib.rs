//! Parallel extraction scheduling.
//!
//! A [`Scheduler`] owns a fixed pool of worker threads fed by one dispatcher.
//! Tasks are ordered by [`siphon_core::Priority`], then submission order; the
//! configured [`LoadBalancer`] picks which idle worker runs the next one.
//! Failed attempts are retried with capped exponential backoff, deadlines are
//! enforced per attempt, and every terminal outcome lands in one
//! [`ExtractionResult`] and the shared [`siphon_metrics::ExtractionMetrics`].
//!
//! [`Pipeline`] is the standard task body: it resolves the file, reads it
//! whole (through the adaptive cache) or as a chunk stream depending on size
//! and memory pressure, and hands the input to a registered
//! [`FieldExtractor`].

mod balancer;
mod context;
mod error;
mod extractor;
mod handle;
mod pipeline;
mod progress;
mod queue;
mod scheduler;
mod task;
mod watchdog;

pub use balancer::{
    BalancingStrategy, LatencyWeighted, LeastBusy, LoadBalancer, PoolView, RoundRobin, WorkerView,
};
pub use context::TaskContext;
pub use error::SubmitError;
pub use extractor::{ExtractorRegistry, FieldExtractor};
pub use handle::TaskHandle;
pub use pipeline::{Pipeline, TaskRunner, WholeFileCache};
pub use progress::{ProgressEvent, ProgressReceiver, ProgressReporter, ProgressSender};
pub use scheduler::{backoff_delay, ExecutionModel, Scheduler, SchedulerBuilder, SchedulerConfig};
pub use task::{AttemptRecord, ExtractionResult, ExtractionTask, TaskSpec, TaskState, TaskStatus};
