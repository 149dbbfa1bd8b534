use crate::balancer::{update_latency, BalancingStrategy, LoadBalancer, PoolView, WorkerView};
use crate::context::TaskContext;
use crate::error::SubmitError;
use crate::handle::{TaskHandle, TaskSlot};
use crate::pipeline::TaskRunner;
use crate::progress::{ProgressEvent, ProgressReceiver, ProgressReporter, ProgressSender};
use crate::queue::{Ranked, TaskQueue};
use crate::task::{AttemptRecord, ExtractionResult, ExtractionTask, TaskSpec, TaskState};
use crate::watchdog;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use siphon_core::{
    panic_payload_to_str, CancellationToken, ExtractError, ExtractionStatus, RawFields, WorkerId,
};
use siphon_metrics::ExtractionMetrics;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

/// How a worker runs an attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// On the worker thread itself. Deadlines are cooperative.
    #[default]
    Thread,
    /// On a dedicated thread per attempt, with the worker released at the deadline.
    Isolated,
}

impl ExecutionModel {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionModel::Thread => "thread",
            ExecutionModel::Isolated => "isolated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub execution_model: ExecutionModel,
    pub strategy: BalancingStrategy,
    /// Applied to tasks submitted without their own timeout.
    pub default_timeout: Option<Duration>,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Queued plus backing-off tasks; running tasks do not count.
    pub queue_capacity: usize,
    pub progress_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            execution_model: ExecutionModel::Thread,
            strategy: BalancingStrategy::RoundRobin,
            default_timeout: Some(Duration::from_secs(300)),
            max_retries: 2,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(10),
            queue_capacity: 10_000,
            progress_channel_capacity: 256,
        }
    }
}

/// Delay before the attempt that follows `retry_count` earlier retries:
/// `base * 2^retry_count`, capped.
pub fn backoff_delay(base: Duration, cap: Duration, retry_count: u32) -> Duration {
    let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

struct Pending {
    task: ExtractionTask,
    slot: Arc<TaskSlot>,
}

struct Assignment {
    seq: u64,
    task: ExtractionTask,
    slot: Arc<TaskSlot>,
}

struct State {
    queue: TaskQueue<Pending>,
    workers: Vec<WorkerView>,
    running: usize,
    next_seq: u64,
    accepting: bool,
    draining: bool,
    aborting: bool,
}

enum Outcome {
    Succeeded(RawFields),
    Failed {
        status: ExtractionStatus,
        error: ExtractError,
    },
}

impl Outcome {
    /// A cancel that lands after classification still ends a failed attempt
    /// as `Cancelled`. Successful attempts keep their result.
    fn settle(self, cancel: &CancellationToken) -> Outcome {
        match self {
            Outcome::Failed { status, .. }
                if status != ExtractionStatus::Cancelled && cancel.is_cancelled() =>
            {
                Outcome::Failed {
                    status: ExtractionStatus::Cancelled,
                    error: ExtractError::Cancelled,
                }
            }
            other => other,
        }
    }
}

pub(crate) struct Shared {
    config: SchedulerConfig,
    runner: Arc<dyn TaskRunner>,
    balancer: Box<dyn LoadBalancer>,
    metrics: Arc<ExtractionMetrics>,
    progress: ProgressSender,
    state: Mutex<State>,
    wake: Condvar,
}

/// Configures optional collaborators before the pool starts.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    balancer: Option<Box<dyn LoadBalancer>>,
    metrics: Option<Arc<ExtractionMetrics>>,
}

impl SchedulerBuilder {
    /// Use a custom strategy instead of `config.strategy`.
    pub fn balancer(mut self, balancer: Box<dyn LoadBalancer>) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// Record into an existing registry.
    pub fn metrics(mut self, metrics: Arc<ExtractionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn the workers and the dispatcher.
    pub fn build(self, runner: Arc<dyn TaskRunner>) -> std::io::Result<Scheduler> {
        let workers = self.config.workers.max(1);
        let balancer = self
            .balancer
            .unwrap_or_else(|| self.config.strategy.build());
        let now = Instant::now();
        let shared = Arc::new(Shared {
            runner,
            balancer,
            metrics: self.metrics.unwrap_or_default(),
            progress: ProgressSender::new(self.config.progress_channel_capacity),
            state: Mutex::new(State {
                queue: TaskQueue::default(),
                workers: (0..workers)
                    .map(|idx| WorkerView {
                        id: WorkerId(idx),
                        busy_since: None,
                        idle_since: now,
                        completed: 0,
                        recent_latency: None,
                    })
                    .collect(),
                running: 0,
                next_seq: 0,
                accepting: true,
                draining: false,
                aborting: false,
            }),
            wake: Condvar::new(),
            config: self.config,
        });

        let scheduler = Scheduler {
            shared: Arc::clone(&shared),
            threads: Mutex::new(Vec::with_capacity(workers + 1)),
        };
        let mut senders = Vec::with_capacity(workers);
        for idx in 0..workers {
            let (tx, rx) = crossbeam_channel::unbounded();
            let worker_shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("siphon-worker-{idx}"))
                .spawn(move || worker_loop(worker_shared, WorkerId(idx), rx))?;
            senders.push(tx);
            scheduler.threads.lock().push(handle);
        }
        let dispatch_shared = Arc::clone(&shared);
        let dispatcher = std::thread::Builder::new()
            .name("siphon-dispatch".to_owned())
            .spawn(move || dispatch_loop(dispatch_shared, senders))?;
        scheduler.threads.lock().push(dispatcher);

        tracing::debug!(
            target = "siphon.scheduler",
            workers,
            model = shared.config.execution_model.as_str(),
            balancer = shared.balancer.name(),
            "scheduler started"
        );
        Ok(scheduler)
    }
}

/// Fixed pool of workers fed from one priority queue.
///
/// Within a priority band tasks start in submission order; completion order
/// across workers is not guaranteed. Dropping the scheduler drains it.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("pending", &state.queue.len())
            .field("running", &state.running)
            .field("accepting", &state.accepting)
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, runner: Arc<dyn TaskRunner>) -> std::io::Result<Self> {
        Self::builder(config).build(runner)
    }

    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            balancer: None,
            metrics: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn metrics(&self) -> &Arc<ExtractionMetrics> {
        &self.shared.metrics
    }

    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.shared.progress.subscribe()
    }

    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().workers.len()
    }

    /// Tasks waiting to run, including those backing off.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn running(&self) -> usize {
        self.shared.state.lock().running
    }

    pub fn pool(&self) -> PoolView {
        PoolView {
            workers: self.shared.state.lock().workers.clone(),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    pub fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, SubmitError> {
        let mut handles = self.submit_batch(std::iter::once(spec))?;
        handles.pop().ok_or(SubmitError::ShuttingDown)
    }

    /// Queue every task or none of them. Handles are in input order.
    pub fn submit_batch<I>(&self, specs: I) -> Result<Vec<TaskHandle>, SubmitError>
    where
        I: IntoIterator<Item = TaskSpec>,
    {
        let specs: Vec<TaskSpec> = specs.into_iter().collect();
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return Err(SubmitError::ShuttingDown);
        }
        let capacity = self.shared.config.queue_capacity;
        if state.queue.len() + specs.len() > capacity {
            tracing::debug!(
                target = "siphon.scheduler",
                capacity,
                requested = specs.len(),
                "submission rejected; queue full"
            );
            return Err(SubmitError::QueueFull { capacity });
        }
        let handles = specs
            .into_iter()
            .map(|spec| self.enqueue(&mut state, spec))
            .collect();
        drop(state);
        self.shared.wake.notify_all();
        Ok(handles)
    }

    /// Submit and block until the task finishes.
    pub fn run_sync(&self, spec: TaskSpec) -> Result<ExtractionResult, SubmitError> {
        Ok(self.submit(spec)?.wait())
    }

    /// Stop accepting work, finish everything queued and running, then join.
    pub fn shutdown(&self) {
        self.shared.begin_shutdown(false);
        self.join();
    }

    /// Stop accepting work, cancel everything still queued, let running
    /// attempts finish, then join.
    pub fn shutdown_now(&self) {
        self.shared.begin_shutdown(true);
        self.join();
    }

    fn enqueue(&self, state: &mut State, spec: TaskSpec) -> TaskHandle {
        let config = &self.shared.config;
        let task = ExtractionTask {
            id: siphon_core::TaskId::next(),
            file: spec.file,
            format: spec.format,
            priority: spec.priority,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(config.max_retries),
            submitted_at: SystemTime::now(),
            timeout: spec.timeout.or(config.default_timeout),
        };
        let slot = Arc::new(TaskSlot::new(&task));
        let seq = state.next_seq;
        state.next_seq += 1;
        tracing::trace!(
            target = "siphon.scheduler",
            task = %task.id,
            file = %task.file,
            format = %task.format,
            priority = ?task.priority,
            "task queued"
        );
        state.queue.push(Ranked {
            priority: task.priority,
            seq,
            item: Pending {
                task,
                slot: Arc::clone(&slot),
            },
        });
        TaskHandle::new(slot, Arc::downgrade(&self.shared))
    }

    fn join(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        let current = std::thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().map(str::to_owned);
            if handle.join().is_err() {
                tracing::error!(
                    target = "siphon.scheduler",
                    thread = name.as_deref().unwrap_or("<unnamed>"),
                    "scheduler thread panicked"
                );
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn begin_shutdown(&self, abort: bool) {
        let mut state = self.state.lock();
        state.accepting = false;
        state.draining = true;
        if abort {
            state.aborting = true;
            let pending = state.queue.drain();
            for entry in &pending {
                entry.slot.cancel.cancel();
                self.complete_terminal(
                    &entry.slot,
                    ExtractionStatus::Cancelled,
                    None,
                    Some(ExtractError::Cancelled),
                    None,
                );
            }
            if !pending.is_empty() {
                tracing::debug!(
                    target = "siphon.scheduler",
                    cancelled = pending.len(),
                    "shutdown cancelled queued tasks"
                );
            }
        }
        drop(state);
        self.wake.notify_all();
    }

    /// Complete a queued or backing-off task as cancelled. Running tasks are
    /// left to observe their token.
    pub(crate) fn cancel_pending(&self, slot: &Arc<TaskSlot>) {
        let mut state = self.state.lock();
        if !matches!(slot.state(), TaskState::Queued | TaskState::Retrying) {
            return;
        }
        let id = slot.id;
        state.queue.remove_where(|pending| pending.task.id == id);
        self.complete_terminal(
            slot,
            ExtractionStatus::Cancelled,
            None,
            Some(ExtractError::Cancelled),
            None,
        );
        drop(state);
        self.wake.notify_all();
    }

    fn select_worker(&self, task: &ExtractionTask, pool: &PoolView, fallback: WorkerId) -> WorkerId {
        match self.balancer.select(task, pool) {
            Some(worker) if pool.is_idle(worker) => worker,
            selected => {
                tracing::debug!(
                    target = "siphon.scheduler",
                    balancer = self.balancer.name(),
                    selected = ?selected,
                    fallback = %fallback,
                    "balancer did not pick an idle worker"
                );
                fallback
            }
        }
    }

    fn execute(&self, worker: WorkerId, assignment: Assignment) {
        let Assignment { seq, task, slot } = assignment;
        let attempt = task.attempt();
        slot.progress.reset();
        self.progress.send(ProgressEvent::Begin {
            task_id: task.id,
            file: task.file.clone(),
            format: task.format.clone(),
            worker,
            attempt,
        });

        let attempt_token = slot.cancel.child_token();
        let started = Instant::now();
        let ctx = TaskContext::new(
            task.id,
            task.file.clone(),
            task.format.clone(),
            attempt,
            worker,
            attempt_token.clone(),
            task.timeout.map(|timeout| started + timeout),
            ProgressReporter::new(task.id, Arc::clone(&slot.progress), self.progress.clone()),
        );

        let result = if slot.cancel.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            match self.config.execution_model {
                ExecutionModel::Thread => self.run_inline(&task, &ctx),
                ExecutionModel::Isolated => {
                    let runner = Arc::clone(&self.runner);
                    let isolated_task = task.clone();
                    let isolated_ctx = ctx.clone();
                    watchdog::run_isolated(
                        format!("siphon-isolated-{}", task.id.as_u64()),
                        task.timeout,
                        &slot.cancel,
                        attempt_token,
                        move || runner.run(&isolated_task, &isolated_ctx),
                    )
                }
            }
        };
        let elapsed = started.elapsed();
        let outcome = self.classify(&task, &slot, result, elapsed);
        self.finish_attempt(worker, seq, task, slot, outcome, elapsed);
    }

    fn run_inline(&self, task: &ExtractionTask, ctx: &TaskContext) -> Result<RawFields, ExtractError> {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.runner.run(task, ctx)))
            .unwrap_or_else(|payload| {
                Err(ExtractError::Panicked(
                    panic_payload_to_str(&*payload).to_owned(),
                ))
            })
    }

    fn classify(
        &self,
        task: &ExtractionTask,
        slot: &TaskSlot,
        result: Result<RawFields, ExtractError>,
        elapsed: Duration,
    ) -> Outcome {
        if slot.cancel.is_cancelled() {
            return Outcome::Failed {
                status: ExtractionStatus::Cancelled,
                error: ExtractError::Cancelled,
            };
        }
        let overran = task.timeout.is_some_and(|limit| elapsed > limit);
        match result {
            Ok(_) if overran && self.config.execution_model == ExecutionModel::Thread => {
                Outcome::Failed {
                    status: ExtractionStatus::TimedOut,
                    error: ExtractError::DeadlineExceeded(elapsed),
                }
            }
            Ok(fields) => Outcome::Succeeded(fields),
            Err(error @ ExtractError::DeadlineExceeded(_)) => Outcome::Failed {
                status: ExtractionStatus::TimedOut,
                error,
            },
            Err(ExtractError::Cancelled) => Outcome::Failed {
                status: ExtractionStatus::Cancelled,
                error: ExtractError::Cancelled,
            },
            Err(error) => {
                if let ExtractError::Panicked(message) = &error {
                    tracing::error!(
                        target = "siphon.scheduler",
                        task = %task.id,
                        file = %task.file,
                        attempt = task.attempt(),
                        panic = %message,
                        "extractor panicked"
                    );
                }
                Outcome::Failed {
                    status: ExtractionStatus::Failed,
                    error,
                }
            }
        }
    }

    fn finish_attempt(
        &self,
        worker: WorkerId,
        seq: u64,
        mut task: ExtractionTask,
        slot: Arc<TaskSlot>,
        outcome: Outcome,
        elapsed: Duration,
    ) {
        let mut state = self.state.lock();
        let now = Instant::now();
        if let Some(view) = state.workers.get_mut(worker.0) {
            view.busy_since = None;
            view.idle_since = now;
            view.completed += 1;
            view.recent_latency = Some(update_latency(view.recent_latency, elapsed));
        }
        state.running = state.running.saturating_sub(1);

        match outcome.settle(&slot.cancel) {
            Outcome::Succeeded(fields) => {
                let attempt = AttemptRecord {
                    attempt: task.attempt(),
                    worker,
                    status: ExtractionStatus::Success,
                    elapsed,
                    error: None,
                };
                self.complete_terminal(
                    &slot,
                    ExtractionStatus::Success,
                    Some(attempt),
                    None,
                    Some(fields),
                );
            }
            Outcome::Failed { status, error } => {
                let retryable = match status {
                    ExtractionStatus::TimedOut => true,
                    ExtractionStatus::Failed => error.is_retryable(),
                    _ => false,
                };
                let retry = retryable && task.can_retry() && !state.aborting;
                if retry {
                    let delay = backoff_delay(
                        self.config.backoff_base,
                        self.config.backoff_cap,
                        task.retry_count,
                    );
                    tracing::debug!(
                        target = "siphon.scheduler",
                        task = %task.id,
                        attempt = task.attempt(),
                        max_retries = task.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed; retrying after backoff"
                    );
                    slot.mark_retrying(AttemptRecord {
                        attempt: task.attempt(),
                        worker,
                        status: ExtractionStatus::Retried,
                        elapsed,
                        error: Some(error),
                    });
                    self.metrics.record_retry(task.format.as_str());
                    task.retry_count += 1;
                    let priority = task.priority;
                    state.queue.push_delayed(
                        now + delay,
                        Ranked {
                            priority,
                            seq,
                            item: Pending { task, slot },
                        },
                    );
                } else {
                    let attempt = AttemptRecord {
                        attempt: task.attempt(),
                        worker,
                        status,
                        elapsed,
                        error: Some(error.clone()),
                    };
                    self.complete_terminal(&slot, status, Some(attempt), Some(error), None);
                }
            }
        }
        drop(state);
        self.wake.notify_all();
    }

    fn complete_terminal(
        &self,
        slot: &TaskSlot,
        status: ExtractionStatus,
        attempt: Option<AttemptRecord>,
        error: Option<ExtractError>,
        metadata: Option<RawFields>,
    ) {
        let Some(result) = slot.complete(status, attempt, error, metadata) else {
            return;
        };
        self.metrics.record_result(
            slot.format.as_str(),
            status,
            result.elapsed,
            result.attempts,
        );
        self.progress.send(ProgressEvent::End {
            task_id: slot.id,
            status,
        });
        match &result.error {
            Some(error) => tracing::debug!(
                target = "siphon.scheduler",
                task = %slot.id,
                file = %slot.file,
                %status,
                attempts = result.attempts,
                error = %error,
                "task finished"
            ),
            None => tracing::debug!(
                target = "siphon.scheduler",
                task = %slot.id,
                file = %slot.file,
                %status,
                attempts = result.attempts,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "task finished"
            ),
        }
    }
}

fn dispatch_loop(shared: Arc<Shared>, senders: Vec<Sender<Assignment>>) {
    let mut state = shared.state.lock();
    loop {
        state.queue.promote(Instant::now());
        if state.queue.has_ready() {
            let pool = PoolView {
                workers: state.workers.clone(),
            };
            if let Some(fallback) = pool.first_idle() {
                if let Some(entry) = state.queue.pop() {
                    let Ranked { seq, item, .. } = entry;
                    let worker = shared.select_worker(&item.task, &pool, fallback);
                    state.workers[worker.0].busy_since = Some(Instant::now());
                    state.running += 1;
                    item.slot.mark_running(worker);
                    let assignment = Assignment {
                        seq,
                        task: item.task,
                        slot: item.slot,
                    };
                    if let Err(err) = senders[worker.0].send(assignment) {
                        // The worker is gone; it stays marked busy so nothing else is sent to it.
                        state.running -= 1;
                        let Assignment { task, slot, .. } = err.into_inner();
                        tracing::error!(
                            target = "siphon.scheduler",
                            task = %task.id,
                            %worker,
                            "worker thread exited; failing task"
                        );
                        shared.complete_terminal(
                            &slot,
                            ExtractionStatus::Failed,
                            None,
                            Some(ExtractError::Panicked(format!("{worker} exited"))),
                            None,
                        );
                    }
                    continue;
                }
            }
        }

        if state.draining && state.queue.is_empty() && state.running == 0 {
            break;
        }
        match state.queue.next_ready_at() {
            Some(ready_at) => {
                shared.wake.wait_until(&mut state, ready_at);
            }
            None => shared.wake.wait(&mut state),
        }
    }
    drop(state);
    drop(senders);
    tracing::debug!(target = "siphon.scheduler", "dispatcher stopped");
}

fn worker_loop(shared: Arc<Shared>, worker: WorkerId, rx: Receiver<Assignment>) {
    for assignment in rx.iter() {
        shared.execute(worker, assignment);
    }
    tracing::trace!(target = "siphon.scheduler", %worker, "worker stopped");
}
