//! Bounded-concurrency resolution of needs-merge files.
//!
//! `N` scoped worker threads pull the next task index from a shared counter
//! until the list is drained, so a slow file never holds back a whole
//! batch. Results land in per-index slots and come back in input order.
//! Every task reaches a terminal outcome: a panic while resolving one file
//! becomes that file's failure and the worker moves on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::executor::MergeExecutor;
use super::types::{FailureReason, MergeOutcome, MergeTask};

/// Runs [`MergeExecutor::execute`] over many tasks, at most
/// `max_concurrency` at a time.
#[derive(Clone, Copy, Debug)]
pub struct ParallelCoordinator {
    max_concurrency: usize,
}

impl ParallelCoordinator {
    /// A zero limit is treated as one.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// One outcome per task, in task order. Returns only once every task
    /// has finished.
    #[must_use]
    pub fn run(&self, executor: &MergeExecutor<'_>, tasks: &[MergeTask]) -> Vec<MergeOutcome> {
        let results = map_bounded(tasks, self.max_concurrency, |task| executor.execute(task));
        tasks
            .iter()
            .zip(results)
            .map(|(task, result)| {
                result.unwrap_or_else(|message| MergeOutcome::Failed {
                    path: task.target().to_path_buf(),
                    reason: FailureReason::ExecutorPanicked { message },
                })
            })
            .collect()
    }
}

/// Apply `f` to every item with at most `limit` calls in flight.
///
/// `Err` carries the panic message of a call that panicked.
pub fn map_bounded<T, R, F>(items: &[T], limit: usize, f: F) -> Vec<Result<R, String>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let slots: Vec<Mutex<Option<Result<R, String>>>> =
        items.iter().map(|_| Mutex::new(None)).collect();
    let next = AtomicUsize::new(0);
    let workers = limit.max(1).min(items.len());
    debug!(items = items.len(), workers, "starting worker pool");

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(i) else { break };
                    let result =
                        panic::catch_unwind(AssertUnwindSafe(|| f(item))).map_err(panic_message);
                    *slots[i].lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                }
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| {
            slot.into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or_else(|| Err("task was never run".to_owned()))
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
