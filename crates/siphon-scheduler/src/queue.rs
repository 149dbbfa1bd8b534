use siphon_core::Priority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// An entry in the ready heap: higher priority first, then lower sequence.
#[derive(Debug)]
pub(crate) struct Ranked<T> {
    pub priority: Priority,
    /// Submission order. Retries keep the sequence they were submitted with.
    pub seq: u64,
    pub item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct Delayed<T> {
    ready_at: Instant,
    entry: Ranked<T>,
}

/// Priority queue with a side list of entries waiting out a backoff delay.
#[derive(Debug)]
pub(crate) struct TaskQueue<T> {
    ready: BinaryHeap<Ranked<T>>,
    delayed: Vec<Delayed<T>>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            ready: BinaryHeap::new(),
            delayed: Vec::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn push(&mut self, entry: Ranked<T>) {
        self.ready.push(entry);
    }

    pub fn push_delayed(&mut self, ready_at: Instant, entry: Ranked<T>) {
        self.delayed.push(Delayed { ready_at, entry });
    }

    /// Move every delayed entry whose time has come into the ready heap.
    pub fn promote(&mut self, now: Instant) {
        let mut idx = 0;
        while idx < self.delayed.len() {
            if self.delayed[idx].ready_at <= now {
                let delayed = self.delayed.swap_remove(idx);
                self.ready.push(delayed.entry);
            } else {
                idx += 1;
            }
        }
    }

    pub fn pop(&mut self) -> Option<Ranked<T>> {
        self.ready.pop()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Earliest time a delayed entry becomes ready.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.delayed.iter().map(|delayed| delayed.ready_at).min()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }

    /// Remove every entry matching `pred`, ready or delayed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let ready = std::mem::take(&mut self.ready);
        for entry in ready.into_vec() {
            if pred(&entry.item) {
                removed.push(entry.item);
            } else {
                self.ready.push(entry);
            }
        }
        let mut idx = 0;
        while idx < self.delayed.len() {
            if pred(&self.delayed[idx].entry.item) {
                removed.push(self.delayed.swap_remove(idx).entry.item);
            } else {
                idx += 1;
            }
        }
        removed
    }

    /// Empty the queue, ready entries first in dispatch order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(entry) = self.ready.pop() {
            drained.push(entry.item);
        }
        drained.extend(self.delayed.drain(..).map(|delayed| delayed.entry.item));
        drained
    }
}
