//! Batching scheduler: candidates that pass the dedup claim are queued, and
//! the queue drains as one batch once no new candidate arrived for the
//! debounce window (50ms). The queue is swapped out wholesale on drain, so
//! the next batch accumulates while the previous one is dispatched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, trace};

use crate::classify::MediaKind;
use crate::debounce::{ArmPolicy, Debouncer};
use crate::dedup::DedupTracker;
use crate::dispatch::{Dispatcher, DrainReport};
use crate::dom::Element;
use crate::observer::{Candidate, CandidateSink};

pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Per-candidate processing step run by the dispatcher.
/// Implementations absorb their own failures.
#[async_trait]
pub trait Inspect: Send + Sync {
    async fn inspect(&self, candidate: Candidate);
}

pub struct BatchScheduler {
    queue: Arc<Mutex<Vec<Candidate>>>,
    dedup: DedupTracker,
    drain_timer: Debouncer,
    dispatcher: Dispatcher,
    inspector: Arc<dyn Inspect>,
}

impl BatchScheduler {
    pub fn new(inspector: Arc<dyn Inspect>, batch_delay: Duration, dispatcher: Dispatcher) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
            dedup: DedupTracker::new(),
            drain_timer: Debouncer::new("batch_drain", batch_delay, ArmPolicy::Restart),
            dispatcher,
            inspector,
        }
    }

    /// Claim and queue `element`, then restart the drain timer.
    /// Returns false if the element was already claimed.
    pub fn enqueue(&self, element: &Arc<Element>, kind: MediaKind) -> bool {
        if !self.dedup.should_enqueue(element) {
            trace!(element = %element.id(), "already_claimed");
            return false;
        }
        self.queue.lock().push(Candidate::new(element, kind));

        let queue = Arc::clone(&self.queue);
        let inspector = Arc::clone(&self.inspector);
        let dispatcher = self.dispatcher;
        self.drain_timer.arm(move || async move {
            let batch = std::mem::take(&mut *queue.lock());
            if batch.is_empty() {
                return;
            }
            let report = dispatcher
                .drain(batch, |candidate| inspector.inspect(candidate))
                .await;
            info!(items = report.items, chunks = report.chunks, "batch_drained");
        });
        true
    }

    /// Drain whatever is queued right now and wait for it to finish. The
    /// pending drain timer is cancelled, so the same batch never runs twice.
    pub async fn flush(&self) -> DrainReport {
        self.drain_timer.cancel();
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return DrainReport::default();
        }
        let report = self
            .dispatcher
            .drain(batch, |candidate| self.inspector.inspect(candidate))
            .await;
        info!(items = report.items, chunks = report.chunks, "batch_flushed");
        report
    }

    /// Candidates waiting for the next drain.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }
}

impl CandidateSink for BatchScheduler {
    fn offer(&self, element: &Arc<Element>, kind: MediaKind) -> bool {
        self.enqueue(element, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementId;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(ElementId, Instant)>>,
    }

    #[async_trait]
    impl Inspect for Recorder {
        async fn inspect(&self, candidate: Candidate) {
            self.calls.lock().push((candidate.id, Instant::now()));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn scheduler() -> (Arc<Recorder>, BatchScheduler) {
        let rec = Arc::new(Recorder::default());
        let sched = BatchScheduler::new(rec.clone(), DEFAULT_BATCH_DELAY, Dispatcher::new(5));
        (rec, sched)
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_enqueue_is_inspected_once() {
        let (rec, sched) = scheduler();
        let img = Element::new("img");
        assert!(sched.enqueue(&img, MediaKind::Image));
        assert!(!sched.enqueue(&img, MediaKind::Image));
        assert_eq!(sched.queued(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!sched.enqueue(&img, MediaKind::Image));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rec.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn arrivals_reset_the_window() {
        let (rec, sched) = scheduler();
        let start = Instant::now();
        let a = Element::new("img");
        let b = Element::new("img");

        sched.enqueue(&a, MediaKind::Image);
        tokio::time::sleep(Duration::from_millis(30)).await;
        sched.enqueue(&b, MediaKind::Image);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rec.calls.lock().is_empty());
        assert_eq!(sched.queued(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = rec.calls.lock();
        assert_eq!(calls.len(), 2);
        for (_, at) in calls.iter() {
            assert_eq!(*at - start, Duration::from_millis(80));
        }
        assert_eq!(sched.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn next_batch_accumulates_during_dispatch() {
        let (rec, sched) = scheduler();
        let first = Element::new("img");
        sched.enqueue(&first, MediaKind::Image);
        tokio::time::sleep(Duration::from_millis(51)).await;
        assert_eq!(sched.queued(), 0);

        let second = Element::new("video");
        assert!(sched.enqueue(&second, MediaKind::Video));
        assert_eq!(sched.queued(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rec.calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_drains_queue_without_waiting_for_timer() {
        let (rec, sched) = scheduler();
        let a = Element::new("img");
        let b = Element::new("img");
        sched.enqueue(&a, MediaKind::Image);
        sched.enqueue(&b, MediaKind::Image);

        let report = sched.flush().await;
        assert_eq!(report, DrainReport { items: 2, chunks: 1 });
        assert_eq!(rec.calls.lock().len(), 2);
        assert_eq!(sched.queued(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rec.calls.lock().len(), 2);
        assert_eq!(sched.flush().await, DrainReport::default());
    }
}
