//! Background worker: the message-driven side that owns the classification
//! service. Content-side code talks to it only through `BackgroundHandle`.
//! Each `CheckMedia` is served on its own task so checks overlap freely.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classify::{ClassificationService, ClassifyError, MediaKind, UserFilter, Verdict};
use crate::error::FilterError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum BackgroundRequest {
    CheckMedia {
        url: String,
        filters: Vec<UserFilter>,
        kind: MediaKind,
        reply: oneshot::Sender<Verdict>,
    },
    ClearCache {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct BackgroundHandle {
    tx: mpsc::Sender<BackgroundRequest>,
}

impl BackgroundHandle {
    /// Classify one media URL. A vanished worker is answered like any other
    /// backend failure: a non-blocking verdict.
    pub async fn check_media(&self, url: &str, filters: &[UserFilter], kind: MediaKind) -> Verdict {
        let (reply, rx) = oneshot::channel();
        let request = BackgroundRequest::CheckMedia {
            url: url.to_string(),
            filters: filters.to_vec(),
            kind,
            reply,
        };
        if self.tx.send(request).await.is_err() {
            warn!("background worker gone, failing open");
            return Verdict::backend_error(kind, &unavailable());
        }
        match rx.await {
            Ok(verdict) => verdict,
            Err(_) => Verdict::backend_error(kind, &unavailable()),
        }
    }

    pub async fn clear_cache(&self) -> Result<(), FilterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BackgroundRequest::ClearCache { reply })
            .await
            .map_err(|_| FilterError::ChannelClosed)?;
        rx.await.map_err(|_| FilterError::ChannelClosed)
    }
}

fn unavailable() -> ClassifyError {
    ClassifyError::Unavailable("background worker stopped".to_string())
}

/// Spawn the worker loop. It exits once every handle has been dropped.
pub fn spawn_background(service: Arc<ClassificationService>) -> (BackgroundHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        info!("background worker started");

        while let Some(request) = rx.recv().await {
            match request {
                BackgroundRequest::CheckMedia {
                    url,
                    filters,
                    kind,
                    reply,
                } => {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        let verdict = service.classify(&url, &filters, kind).await;
                        if reply.send(verdict).is_err() {
                            debug!("check_media caller went away");
                        }
                    });
                }
                BackgroundRequest::ClearCache { reply } => {
                    service.clear_cache();
                    let _ = reply.send(());
                }
            }
        }

        info!("background worker exiting");
    });

    (BackgroundHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExpiringCache;
    use crate::classify::{ClassifyRequest, Classifier, FilterLevel, RemoteVerdict};
    use crate::stats::{Stats, StatsRecorder, DEFAULT_SAVE_INTERVAL};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Blocker(AtomicUsize);

    #[async_trait]
    impl Classifier for Blocker {
        async fn classify(
            &self,
            _request: &ClassifyRequest<'_>,
        ) -> Result<RemoteVerdict, ClassifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteVerdict {
                should_block: true,
                reason: "Detected: spiders".into(),
            })
        }
    }

    fn worker() -> (Arc<Blocker>, BackgroundHandle) {
        let backend = Arc::new(Blocker(AtomicUsize::new(0)));
        let stats = Arc::new(StatsRecorder::new(
            Arc::new(MemoryStore::new()),
            Stats::default(),
            DEFAULT_SAVE_INTERVAL,
        ));
        let service = Arc::new(ClassificationService::new(
            backend.clone(),
            ExpiringCache::new(10, Duration::from_secs(60)),
            stats,
        ));
        let (handle, _task) = spawn_background(service);
        (backend, handle)
    }

    #[tokio::test]
    async fn check_media_round_trips_verdict() {
        let (backend, handle) = worker();
        let filters = vec![UserFilter::new("spiders", FilterLevel::Normal)];
        let v = handle
            .check_media("https://pbs.twimg.com/a.jpg", &filters, MediaKind::Image)
            .await;
        assert!(v.should_block);
        assert_eq!(v.reason, "Detected: spiders");
        assert_eq!(backend.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_cache_invalidates_verdicts() {
        let (backend, handle) = worker();
        let filters = vec![UserFilter::new("spiders", FilterLevel::Normal)];
        let url = "https://pbs.twimg.com/a.jpg";
        handle.check_media(url, &filters, MediaKind::Image).await;
        handle.check_media(url, &filters, MediaKind::Image).await;
        assert_eq!(backend.0.load(Ordering::SeqCst), 1);

        handle.clear_cache().await.unwrap();
        handle.check_media(url, &filters, MediaKind::Image).await;
        assert_eq!(backend.0.load(Ordering::SeqCst), 2);
    }
}
