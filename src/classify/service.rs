//! Cache-fronted classification: one remote request per uncached item,
//! fail-open on any transport failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{
    cache_key, ClassifyRequest, Classifier, MediaKind, UserFilter, Verdict, REASON_NO_FILTERS,
};
use crate::cache::ExpiringCache;
use crate::stats::StatsRecorder;

pub struct ClassificationService {
    backend: Arc<dyn Classifier>,
    cache: ExpiringCache<String, Verdict>,
    stats: Arc<StatsRecorder>,
    /// Advanced on every cache clear. A response is only cached if no clear
    /// happened while it was in flight.
    generation: AtomicU64,
}

impl ClassificationService {
    pub fn new(
        backend: Arc<dyn Classifier>,
        cache: ExpiringCache<String, Verdict>,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            backend,
            cache,
            stats,
            generation: AtomicU64::new(0),
        }
    }

    /// Classify one media URL.
    ///
    /// Cache hits and an empty filter list answer without a request. A
    /// successful response is cached and counted; a failure yields a
    /// non-blocking "Backend error" verdict and leaves the cache untouched so
    /// the next encounter retries. A response that outlives a cache clear is
    /// returned but not cached.
    pub async fn classify(&self, url: &str, filters: &[UserFilter], kind: MediaKind) -> Verdict {
        let key = cache_key(kind, url);
        if let Some(hit) = self.cache.get(&key) {
            debug!(kind = %kind, "cache_hit");
            return hit;
        }

        if filters.is_empty() {
            return Verdict::allow(kind, REASON_NO_FILTERS);
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(
            request_id = %request_id,
            kind = %kind,
            url = %url.chars().take(60).collect::<String>(),
            "classify_request"
        );

        let generation = self.generation.load(Ordering::SeqCst);
        let started = Instant::now();
        let request = ClassifyRequest { url, filters, kind };
        match self.backend.classify(&request).await {
            Ok(remote) => {
                let verdict = Verdict::from_remote(kind, remote);
                if self.generation.load(Ordering::SeqCst) == generation {
                    self.cache.set(key, verdict.clone());
                } else {
                    debug!(request_id = %request_id, kind = %kind, "stale_verdict_not_cached");
                }
                self.stats.record(kind, verdict.should_block);

                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                if verdict.should_block {
                    info!(request_id = %request_id, kind = %kind, reason = %verdict.reason, elapsed_ms, "media_blocked");
                } else {
                    debug!(request_id = %request_id, kind = %kind, reason = %verdict.reason, elapsed_ms, "media_allowed");
                }
                verdict
            }
            Err(e) => {
                warn!(request_id = %request_id, kind = %kind, error = %e, "classification failed");
                Verdict::backend_error(kind, &e)
            }
        }
    }

    /// Drop every cached verdict. Called when the filter list changes.
    pub fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = self.cache.len();
        self.cache.clear();
        info!(dropped, "verdict_cache_cleared");
    }

    pub fn is_cached(&self, kind: MediaKind, url: &str) -> bool {
        self.cache.has(&cache_key(kind, url))
    }

    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};
    use crate::classify::{ClassifyError, FilterLevel, RemoteVerdict, REASON_BACKEND_ERROR};
    use crate::stats::{Stats, DEFAULT_SAVE_INTERVAL};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail: bool,
        block: bool,
    }

    #[async_trait]
    impl Classifier for Scripted {
        async fn classify(
            &self,
            _request: &ClassifyRequest<'_>,
        ) -> Result<RemoteVerdict, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ClassifyError::Status(503));
            }
            Ok(RemoteVerdict {
                should_block: self.block,
                reason: "Detected: x".into(),
            })
        }
    }

    fn service(fail: bool, block: bool) -> (Arc<Scripted>, ClassificationService) {
        let backend = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            fail,
            block,
        });
        let stats = Arc::new(StatsRecorder::new(
            Arc::new(MemoryStore::new()),
            Stats::default(),
            DEFAULT_SAVE_INTERVAL,
        ));
        let svc = ClassificationService::new(
            backend.clone(),
            ExpiringCache::new(DEFAULT_CAPACITY, DEFAULT_TTL),
            stats,
        );
        (backend, svc)
    }

    fn filters() -> Vec<UserFilter> {
        vec![UserFilter::new("x", FilterLevel::Normal)]
    }

    const URL: &str = "https://pbs.twimg.com/x.jpg";

    #[tokio::test]
    async fn empty_filters_short_circuit() {
        let (backend, svc) = service(false, true);
        let v = svc.classify(URL, &[], MediaKind::Image).await;
        assert!(!v.should_block);
        assert_eq!(v.reason, REASON_NO_FILTERS);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(!svc.is_cached(MediaKind::Image, URL));
    }

    #[tokio::test]
    async fn success_is_cached_and_counted() {
        let (backend, svc) = service(false, true);
        let first = svc.classify(URL, &filters(), MediaKind::Image).await;
        let second = svc.classify(URL, &filters(), MediaKind::Image).await;
        assert!(first.should_block);
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let stats = svc.stats().snapshot();
        assert_eq!(stats.total_checked, 1);
        assert_eq!(stats.images_blocked, 1);
    }

    #[tokio::test]
    async fn cache_key_separates_media_kinds() {
        let (backend, svc) = service(false, false);
        svc.classify(URL, &filters(), MediaKind::Image).await;
        svc.classify(URL, &filters(), MediaKind::Video).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_fails_open_without_poisoning_cache() {
        let (backend, svc) = service(true, true);
        let v = svc.classify(URL, &filters(), MediaKind::Image).await;
        assert!(!v.should_block);
        assert_eq!(v.reason, REASON_BACKEND_ERROR);
        assert!(v.error.is_some());
        assert!(!svc.is_cached(MediaKind::Image, URL));

        svc.classify(URL, &filters(), MediaKind::Image).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(svc.stats().snapshot().total_checked, 0);
    }

    #[tokio::test]
    async fn clear_cache_forces_new_request() {
        let (backend, svc) = service(false, false);
        svc.classify(URL, &filters(), MediaKind::Image).await;
        svc.clear_cache();
        svc.classify(URL, &filters(), MediaKind::Image).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    /// Holds the first request until released.
    struct Gated {
        calls: AtomicUsize,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl Classifier for Gated {
        async fn classify(
            &self,
            request: &ClassifyRequest<'_>,
        ) -> Result<RemoteVerdict, ClassifyError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.notified().await;
            }
            Ok(RemoteVerdict {
                should_block: true,
                reason: format!("under {}", request.filters[0].term),
            })
        }
    }

    #[tokio::test]
    async fn verdict_in_flight_across_clear_is_not_cached() {
        let backend = Arc::new(Gated {
            calls: AtomicUsize::new(0),
            gate: tokio::sync::Notify::new(),
        });
        let stats = Arc::new(StatsRecorder::new(
            Arc::new(MemoryStore::new()),
            Stats::default(),
            DEFAULT_SAVE_INTERVAL,
        ));
        let svc = Arc::new(ClassificationService::new(
            backend.clone(),
            ExpiringCache::new(DEFAULT_CAPACITY, DEFAULT_TTL),
            stats,
        ));

        let in_flight = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move {
                let old = vec![UserFilter::new("old", FilterLevel::Normal)];
                svc.classify(URL, &old, MediaKind::Image).await
            }
        });
        while backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        svc.clear_cache();
        backend.gate.notify_one();
        let stale = in_flight.await.unwrap();
        assert_eq!(stale.reason, "under old");
        assert!(!svc.is_cached(MediaKind::Image, URL));

        let new = vec![UserFilter::new("new", FilterLevel::Normal)];
        let fresh = svc.classify(URL, &new, MediaKind::Image).await;
        assert_eq!(fresh.reason, "under new");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(svc.is_cached(MediaKind::Image, URL));
    }
}
