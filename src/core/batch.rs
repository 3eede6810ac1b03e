//! Bounded fan-out over independent tasks
//!
//! Runs tasks on scoped threads, at most `concurrency` at a time. Unbounded
//! runs, and bounds above [`worker_limit`], use `worker_limit()` threads per
//! window. The first error, in input order, is returned after the in-flight
//! window settles; later windows never start.

use crate::error::{Result, TmcoError};
use std::num::NonZeroUsize;

pub fn run<T, R, F>(items: Vec<T>, concurrency: Option<NonZeroUsize>, task: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync,
{
    let width = concurrency
        .map(NonZeroUsize::get)
        .unwrap_or(items.len())
        .min(worker_limit())
        .max(1);

    let mut results = Vec::with_capacity(items.len());
    let mut pending = items.into_iter().peekable();
    let task = &task;

    while pending.peek().is_some() {
        let window: Vec<T> = pending.by_ref().take(width).collect();

        if window.len() == 1 {
            // Not worth a thread
            for item in window {
                results.push(task(item)?);
            }
            continue;
        }

        let outcomes = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = window
                .into_iter()
                .map(|item| scope.builder().spawn(move |_| task(item)))
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|_| Err(panicked())),
                    Err(e) => Err(TmcoError::Io(e)),
                })
                .collect::<Vec<Result<R>>>()
        })
        .map_err(|_| panicked())?;

        for outcome in outcomes {
            results.push(outcome?);
        }
    }

    Ok(results)
}

/// Most threads a single window spawns
pub fn worker_limit() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(MIN_WORKERS)
        .max(MIN_WORKERS)
}

const MIN_WORKERS: usize = 16;

fn panicked() -> TmcoError {
    TmcoError::Io(std::io::Error::other("batch task panicked"))
}
