//! Windowed concurrency: a batch is checked `concurrency` items at a time,
//! and the next window only starts after the whole current one resolved.

use std::future::Future;

use futures_util::future::join_all;
use tracing::debug;

pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub items: usize,
    pub chunks: usize,
}

/// Windowed runner for one batch.
///
/// The limit bounds a single `drain` call. Separate batches are not
/// serialized against each other, so a batch that drains while an earlier
/// one is still running can push in-flight checks above the limit.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    concurrency: usize,
}

impl Dispatcher {
    /// A zero limit is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `check` over `batch` in fixed windows. Within a window the checks
    /// start in batch order and run concurrently; completion order is free.
    /// `check` is expected to absorb its own failures.
    pub async fn drain<T, F, Fut>(&self, batch: Vec<T>, check: F) -> DrainReport
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut report = DrainReport::default();
        let mut items = batch.into_iter();
        loop {
            let window: Vec<T> = items.by_ref().take(self.concurrency).collect();
            if window.is_empty() {
                break;
            }
            let size = window.len();
            join_all(window.into_iter().map(&check)).await;
            report.items += size;
            report.chunks += 1;
            debug!(chunk = report.chunks, size, "dispatch_chunk_done");
        }
        report
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
