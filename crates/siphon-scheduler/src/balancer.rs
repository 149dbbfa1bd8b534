//! Worker selection strategies.
//!
//! A balancer only chooses among idle workers; priority order and dispatch
//! are owned by the scheduler, so swapping strategies changes fairness and
//! throughput but never which tasks run or in what order they start.

use crate::task::ExtractionTask;
use serde::{Deserialize, Serialize};
use siphon_core::WorkerId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Built-in strategies, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancingStrategy {
    #[default]
    RoundRobin,
    LeastBusy,
    LatencyWeighted,
}

impl BalancingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            BalancingStrategy::RoundRobin => "round_robin",
            BalancingStrategy::LeastBusy => "least_busy",
            BalancingStrategy::LatencyWeighted => "latency_weighted",
        }
    }

    pub fn build(self) -> Box<dyn LoadBalancer> {
        match self {
            BalancingStrategy::RoundRobin => Box::new(RoundRobin::default()),
            BalancingStrategy::LeastBusy => Box::new(LeastBusy),
            BalancingStrategy::LatencyWeighted => Box::new(LatencyWeighted),
        }
    }
}

impl std::fmt::Display for BalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one worker at dispatch time.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerView {
    pub id: WorkerId,
    /// Set while the worker runs an attempt.
    pub busy_since: Option<Instant>,
    pub idle_since: Instant,
    pub completed: u64,
    /// Exponentially weighted mean of recent attempt durations.
    pub recent_latency: Option<Duration>,
}

impl WorkerView {
    pub fn is_idle(&self) -> bool {
        self.busy_since.is_none()
    }
}

/// Snapshot of the pool handed to a [`LoadBalancer`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolView {
    pub workers: Vec<WorkerView>,
}

impl PoolView {
    pub fn idle(&self) -> impl Iterator<Item = &WorkerView> + '_ {
        self.workers.iter().filter(|worker| worker.is_idle())
    }

    pub fn is_idle(&self, id: WorkerId) -> bool {
        self.workers
            .get(id.0)
            .is_some_and(|worker| worker.id == id && worker.is_idle())
    }

    pub fn first_idle(&self) -> Option<WorkerId> {
        self.idle().next().map(|worker| worker.id)
    }
}

/// Picks the worker for a task. Returning a busy or unknown worker, or `None`
/// while a worker is idle, makes the scheduler fall back to the first idle one.
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, task: &ExtractionTask, pool: &PoolView) -> Option<WorkerId>;
}

/// Cycles through workers, skipping busy ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl LoadBalancer for RoundRobin {
    fn name(&self) -> &'static str {
        BalancingStrategy::RoundRobin.as_str()
    }

    fn select(&self, _task: &ExtractionTask, pool: &PoolView) -> Option<WorkerId> {
        let len = pool.workers.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor.load(Ordering::Relaxed) % len;
        let chosen = (0..len)
            .map(|offset| &pool.workers[(start + offset) % len])
            .find(|worker| worker.is_idle())?;
        self.cursor.store(chosen.id.0 + 1, Ordering::Relaxed);
        Some(chosen.id)
    }
}

/// Prefers the idle worker that has done the least work, then the one idle longest.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastBusy;

impl LoadBalancer for LeastBusy {
    fn name(&self) -> &'static str {
        BalancingStrategy::LeastBusy.as_str()
    }

    fn select(&self, _task: &ExtractionTask, pool: &PoolView) -> Option<WorkerId> {
        pool.idle()
            .min_by_key(|worker| (worker.completed, worker.idle_since, worker.id))
            .map(|worker| worker.id)
    }
}

/// Prefers the idle worker with the lowest recent latency. Workers without
/// history are tried first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyWeighted;

impl LoadBalancer for LatencyWeighted {
    fn name(&self) -> &'static str {
        BalancingStrategy::LatencyWeighted.as_str()
    }

    fn select(&self, _task: &ExtractionTask, pool: &PoolView) -> Option<WorkerId> {
        pool.idle()
            .min_by_key(|worker| {
                (
                    worker.recent_latency.unwrap_or(Duration::ZERO),
                    worker.completed,
                    worker.id,
                )
            })
            .map(|worker| worker.id)
    }
}

/// Weight of the newest sample in the latency average.
const LATENCY_ALPHA: f64 = 0.3;

pub(crate) fn update_latency(previous: Option<Duration>, sample: Duration) -> Duration {
    match previous {
        None => sample,
        Some(previous) => Duration::from_secs_f64(
            previous.as_secs_f64() * (1.0 - LATENCY_ALPHA) + sample.as_secs_f64() * LATENCY_ALPHA,
        ),
    }
}
