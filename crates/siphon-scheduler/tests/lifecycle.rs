use crossbeam_channel::{unbounded, Receiver};
use siphon_core::{ExtractError, ExtractionStatus, RawFields};
use siphon_scheduler::{
    ExtractionTask, ProgressEvent, Scheduler, SchedulerConfig, SubmitError, TaskContext,
    TaskRunner, TaskSpec, TaskState,
};
use std::sync::Arc;
use std::time::Duration;

/// Tasks named `hold` report 50% and wait for a release; `spin` runs until
/// cancelled; everything else succeeds immediately.
struct Gated {
    release: Receiver<()>,
}

impl TaskRunner for Gated {
    fn run(&self, task: &ExtractionTask, ctx: &TaskContext) -> Result<RawFields, ExtractError> {
        match task.file.as_str() {
            "hold" => {
                ctx.report_progress(50.0);
                let _ = self.release.recv_timeout(Duration::from_secs(10));
            }
            "spin" => loop {
                ctx.check()?;
                std::thread::sleep(Duration::from_millis(2));
            },
            _ => {}
        }
        Ok(RawFields::new())
    }
}

fn gated(config: SchedulerConfig) -> (Scheduler, crossbeam_channel::Sender<()>) {
    let (release_tx, release_rx) = unbounded();
    let scheduler = Scheduler::new(config, Arc::new(Gated { release: release_rx })).unwrap();
    (scheduler, release_tx)
}

fn one_worker() -> SchedulerConfig {
    SchedulerConfig {
        workers: 1,
        default_timeout: None,
        ..SchedulerConfig::default()
    }
}

fn wait_for_state(handle: &siphon_scheduler::TaskHandle, state: TaskState) {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while handle.state() != state {
        assert!(std::time::Instant::now() < deadline, "never reached {state}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn cancelling_a_queued_task_completes_it_immediately() {
    let (scheduler, release) = gated(one_worker());
    let hold = scheduler.submit(TaskSpec::new("hold", "bin")).unwrap();
    wait_for_state(&hold, TaskState::Running);

    let queued = scheduler.submit(TaskSpec::new("later", "bin")).unwrap();
    assert_eq!(queued.state(), TaskState::Queued);
    assert!(queued.cancel());

    let result = queued.try_result().unwrap();
    assert_eq!(result.status, ExtractionStatus::Cancelled);
    assert_eq!(result.attempts, 0);
    assert_eq!(result.worker, None);
    assert_eq!(scheduler.pending(), 0);
    assert!(!queued.cancel());

    release.send(()).unwrap();
    assert!(hold.wait().is_success());
    assert_eq!(scheduler.metrics().snapshot().totals.cancelled, 1);
}

#[test]
fn cancelling_a_running_task_stops_it_at_the_next_check() {
    let (scheduler, _release) = gated(one_worker());
    let spin = scheduler.submit(TaskSpec::new("spin", "bin")).unwrap();
    wait_for_state(&spin, TaskState::Running);

    assert!(spin.cancel());
    let result = spin.wait_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(result.status, ExtractionStatus::Cancelled);
    assert_eq!(result.attempts, 1);
    assert_eq!(spin.status().state, TaskState::Cancelled);
}

#[test]
fn status_reports_progress_of_the_running_attempt() {
    let (scheduler, release) = gated(one_worker());
    let hold = scheduler.submit(TaskSpec::new("hold", "bin")).unwrap();
    wait_for_state(&hold, TaskState::Running);

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while hold.status().progress_percent.is_none() {
        assert!(std::time::Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(hold.status().progress_percent, Some(50.0));
    assert!(hold.try_result().is_none());
    assert!(hold.wait_timeout(Duration::from_millis(10)).is_none());

    release.send(()).unwrap();
    hold.wait();
    let status = hold.status();
    assert_eq!(status.state, TaskState::Succeeded);
    assert_eq!(status.progress_percent, Some(100.0));
}

#[test]
fn full_queue_rejects_submissions() {
    let (scheduler, release) = gated(SchedulerConfig {
        queue_capacity: 2,
        ..one_worker()
    });
    let hold = scheduler.submit(TaskSpec::new("hold", "bin")).unwrap();
    wait_for_state(&hold, TaskState::Running);

    scheduler.submit(TaskSpec::new("a", "bin")).unwrap();
    let err = scheduler
        .submit_batch([TaskSpec::new("b", "bin"), TaskSpec::new("c", "bin")])
        .unwrap_err();
    assert_eq!(err, SubmitError::QueueFull { capacity: 2 });
    // All-or-nothing: the batch left no trace.
    assert_eq!(scheduler.pending(), 1);
    scheduler.submit(TaskSpec::new("b", "bin")).unwrap();
    assert!(matches!(
        scheduler.submit(TaskSpec::new("c", "bin")),
        Err(SubmitError::QueueFull { .. })
    ));
    assert_eq!(ExtractError::from(err).kind(), siphon_core::ErrorKind::ResourceExhaustion);

    release.send(()).unwrap();
}

#[test]
fn shutdown_drains_queued_work() {
    let (scheduler, _release) = gated(SchedulerConfig {
        workers: 2,
        ..one_worker()
    });
    let handles = scheduler
        .submit_batch((0..10).map(|idx| TaskSpec::new(format!("f{idx}"), "bin")))
        .unwrap();
    scheduler.shutdown();

    assert!(handles.iter().all(|handle| handle
        .try_result()
        .is_some_and(|result| result.is_success())));
    assert!(!scheduler.is_accepting());
    assert_eq!(
        scheduler.submit(TaskSpec::new("late", "bin")).unwrap_err(),
        SubmitError::ShuttingDown
    );
}

#[test]
fn shutdown_now_cancels_queued_work_but_finishes_running_work() {
    let (scheduler, release) = gated(one_worker());
    let hold = scheduler.submit(TaskSpec::new("hold", "bin")).unwrap();
    wait_for_state(&hold, TaskState::Running);
    let queued = scheduler
        .submit_batch((0..3).map(|idx| TaskSpec::new(format!("q{idx}"), "bin")))
        .unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| scheduler.shutdown_now());
        for handle in &queued {
            let result = handle.wait();
            assert_eq!(result.status, ExtractionStatus::Cancelled);
        }
        release.send(()).unwrap();
    });

    assert!(hold.try_result().unwrap().is_success());
}

#[test]
fn progress_events_bracket_each_task() {
    let (scheduler, release) = gated(one_worker());
    let mut events = scheduler.subscribe_progress();
    release.send(()).unwrap();

    let result = scheduler.run_sync(TaskSpec::new("hold", "bin")).unwrap();
    assert!(result.is_success());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.task_id(), result.task_id);
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(ProgressEvent::Begin { attempt: 1, .. })));
    assert!(seen.contains(&ProgressEvent::Report {
        task_id: result.task_id,
        percentage: Some(50),
    }));
    assert_eq!(
        seen.last(),
        Some(&ProgressEvent::End {
            task_id: result.task_id,
            status: ExtractionStatus::Success,
        })
    );
}

#[test]
fn dropping_the_scheduler_finishes_outstanding_tasks() {
    let (scheduler, _release) = gated(one_worker());
    let handles = scheduler
        .submit_batch((0..5).map(|idx| TaskSpec::new(format!("d{idx}"), "bin")))
        .unwrap();
    drop(scheduler);

    for handle in handles {
        assert!(handle.try_result().is_some());
        // Nothing left to cancel once the scheduler is gone.
        assert!(!handle.cancel());
    }
}
