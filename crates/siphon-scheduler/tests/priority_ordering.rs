use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use siphon_core::{ExtractError, Priority, RawFields};
use siphon_scheduler::{
    BalancingStrategy, ExtractionTask, Scheduler, SchedulerConfig, TaskContext, TaskRunner, TaskSpec,
};
use std::sync::Arc;
use std::time::Duration;

/// Runs tasks in order, recording when each starts. The task named `blocker`
/// announces itself and then holds its worker until released.
struct Recorder {
    started: Mutex<Vec<String>>,
    blocker_running: Sender<()>,
    release: Receiver<()>,
}

impl TaskRunner for Recorder {
    fn run(&self, task: &ExtractionTask, _ctx: &TaskContext) -> Result<RawFields, ExtractError> {
        self.started.lock().push(task.file.as_str().to_owned());
        if task.file.as_str() == "blocker" {
            let _ = self.blocker_running.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(10));
        }
        Ok(RawFields::new())
    }
}

fn config(strategy: BalancingStrategy) -> SchedulerConfig {
    SchedulerConfig {
        workers: 1,
        strategy,
        default_timeout: None,
        ..SchedulerConfig::default()
    }
}

fn run_low_high_low_high(strategy: BalancingStrategy) -> Vec<String> {
    let (running_tx, running_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let recorder = Arc::new(Recorder {
        started: Mutex::new(Vec::new()),
        blocker_running: running_tx,
        release: release_rx,
    });
    let scheduler = Scheduler::new(config(strategy), recorder.clone()).unwrap();

    let blocker = scheduler.submit(TaskSpec::new("blocker", "bin")).unwrap();
    running_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let handles = scheduler
        .submit_batch([
            TaskSpec::new("low-1", "bin").priority(Priority::Low),
            TaskSpec::new("high-1", "bin").priority(Priority::High),
            TaskSpec::new("low-2", "bin").priority(Priority::Low),
            TaskSpec::new("high-2", "bin").priority(Priority::High),
        ])
        .unwrap();
    assert_eq!(scheduler.pending(), 4);
    release_tx.send(()).unwrap();

    assert!(blocker.wait().is_success());
    for handle in &handles {
        assert!(handle.wait().is_success());
    }
    let started = recorder.started.lock().clone();
    started
}

#[test]
fn high_priority_tasks_start_before_earlier_low_ones() {
    let started = run_low_high_low_high(BalancingStrategy::RoundRobin);
    assert_eq!(started, vec!["blocker", "high-1", "high-2", "low-1", "low-2"]);
}

#[test]
fn ordering_does_not_depend_on_the_balancer() {
    for strategy in [BalancingStrategy::LeastBusy, BalancingStrategy::LatencyWeighted] {
        let started = run_low_high_low_high(strategy);
        assert_eq!(
            started,
            vec!["blocker", "high-1", "high-2", "low-1", "low-2"],
            "{strategy}"
        );
    }
}

#[test]
fn same_priority_runs_in_submission_order() {
    let (running_tx, running_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let recorder = Arc::new(Recorder {
        started: Mutex::new(Vec::new()),
        blocker_running: running_tx,
        release: release_rx,
    });
    let scheduler = Scheduler::new(config(BalancingStrategy::RoundRobin), recorder.clone()).unwrap();
    scheduler.submit(TaskSpec::new("blocker", "bin")).unwrap();
    running_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let names: Vec<String> = (0..8).map(|idx| format!("task-{idx}")).collect();
    let handles = scheduler
        .submit_batch(names.iter().map(|name| TaskSpec::new(name.as_str(), "bin")))
        .unwrap();
    release_tx.send(()).unwrap();
    for handle in &handles {
        handle.wait();
    }

    let started = recorder.started.lock().clone();
    assert_eq!(&started[1..], names.as_slice());
}

#[test]
fn many_workers_share_the_load() {
    let (running_tx, _running_rx) = unbounded();
    let (_release_tx, release_rx) = unbounded();
    let recorder = Arc::new(Recorder {
        started: Mutex::new(Vec::new()),
        blocker_running: running_tx,
        release: release_rx,
    });
    let scheduler = Scheduler::new(
        SchedulerConfig {
            workers: 4,
            strategy: BalancingStrategy::LeastBusy,
            ..config(BalancingStrategy::LeastBusy)
        },
        recorder.clone(),
    )
    .unwrap();

    let handles = scheduler
        .submit_batch((0..40).map(|idx| TaskSpec::new(format!("t{idx}"), "bin")))
        .unwrap();
    for handle in &handles {
        assert!(handle.wait().is_success());
    }
    scheduler.shutdown();

    assert_eq!(recorder.started.lock().len(), 40);
    let pool = scheduler.pool();
    assert_eq!(pool.workers.iter().map(|w| w.completed).sum::<u64>(), 40);
    assert!(pool.workers.iter().all(|w| w.is_idle()));
}
