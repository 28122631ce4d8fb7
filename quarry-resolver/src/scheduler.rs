//! Bounded-concurrency scheduler.
//!
//! Runs an operation over a queue of tasks with at most `window` operations
//! in flight. It is a sliding window, not a sequence of fixed waves: as soon
//! as one operation completes the next queued task starts.

use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::trace;

use crate::cancel::CancelToken;

/// What a scheduling run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutput<T, O> {
    /// Operation outputs in completion order.
    pub completed: Vec<O>,
    /// Tasks never started because the run was cancelled.
    pub skipped: Vec<T>,
}

impl<T, O> Default for ScheduleOutput<T, O> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T, O> ScheduleOutput<T, O> {
    pub fn was_cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Run `op` over `tasks` keeping `min(window, remaining)` operations in flight.
///
/// A window of 0 is treated as 1. Operations are never retried. Once `cancel`
/// fires, running operations are allowed to finish but nothing new starts;
/// the unstarted tasks come back in [`ScheduleOutput::skipped`] in their
/// original order.
pub async fn run_bounded<T, O, F, Fut>(
    tasks: Vec<T>,
    window: usize,
    cancel: &CancelToken,
    op: F,
) -> ScheduleOutput<T, O>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = O>,
{
    let window = window.max(1);
    let total = tasks.len();
    let mut queue = tasks.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut completed = Vec::with_capacity(total);

    loop {
        while in_flight.len() < window && !cancel.is_cancelled() {
            match queue.next() {
                Some(task) => in_flight.push(op(task)),
                None => break,
            }
        }

        match in_flight.next().await {
            Some(output) => completed.push(output),
            None => break,
        }
    }

    let skipped: Vec<T> = queue.collect();
    trace!(
        total,
        window,
        completed = completed.len(),
        skipped = skipped.len(),
        "Scheduling run finished"
    );
    ScheduleOutput { completed, skipped }
}
