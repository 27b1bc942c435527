//! Content-side glue: wires the change feed into the batching scheduler,
//! inspects each candidate through the background worker, and puts an
//! overlay on anything that comes back blocked.
//!
//! Monitoring only runs while at least one user filter is set.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::UserFilter;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::dom::{Document, Element, ElementId};
use crate::error::FilterError;
use crate::messaging::BackgroundHandle;
use crate::observer::{Candidate, ChangeFeed, MediaMatcher};
use crate::overlay::Overlay;
use crate::scheduler::{BatchScheduler, Inspect};
use crate::storage::Storage;
use crate::theme::ThemeCache;

/// Per-candidate step: eligibility, classification, overlay.
pub struct Inspector {
    document: Arc<Document>,
    matcher: Arc<MediaMatcher>,
    background: BackgroundHandle,
    filters: Arc<RwLock<Vec<UserFilter>>>,
    theme: ThemeCache,
    overlays: Mutex<HashMap<ElementId, Weak<Overlay>>>,
}

impl Inspector {
    fn remember(&self, id: ElementId, overlay: &Arc<Overlay>) {
        let mut overlays = self.overlays.lock();
        overlays.retain(|_, o| o.strong_count() > 0);
        overlays.insert(id, Arc::downgrade(overlay));
    }

    pub fn overlay_for(&self, element: &Element) -> Option<Arc<Overlay>> {
        self.overlays.lock().get(&element.id()).and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Inspect for Inspector {
    async fn inspect(&self, candidate: Candidate) {
        let Some(element) = candidate.element.upgrade() else {
            debug!(element = %candidate.id, "candidate gone before inspection");
            return;
        };
        let Some(url) = self.matcher.media_url(&element, candidate.kind) else {
            debug!(element = %candidate.id, kind = %candidate.kind, "candidate not eligible");
            return;
        };
        let filters = self.filters.read().clone();

        let verdict = self
            .background
            .check_media(&url, &filters, candidate.kind)
            .await;
        if !verdict.should_block {
            return;
        }

        let theme = self.theme.current(&self.document);
        if let Some(overlay) = Overlay::apply(&self.document, &element, &verdict, theme) {
            self.remember(candidate.id, &overlay);
        }
    }
}

struct FeedRun {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MediaFilter {
    document: Arc<Document>,
    storage: Arc<dyn Storage>,
    background: BackgroundHandle,
    filters: Arc<RwLock<Vec<UserFilter>>>,
    inspector: Arc<Inspector>,
    scheduler: Arc<BatchScheduler>,
    feed: Arc<ChangeFeed>,
    running: Mutex<Option<FeedRun>>,
}

impl MediaFilter {
    pub fn new(
        config: &Config,
        document: Arc<Document>,
        storage: Arc<dyn Storage>,
        background: BackgroundHandle,
    ) -> Result<Self, FilterError> {
        let pipeline = &config.pipeline;
        let matcher = Arc::new(MediaMatcher::new(
            &pipeline.media_host_pattern,
            pipeline.min_media_px,
        )?);
        let filters = Arc::new(RwLock::new(Vec::new()));

        let inspector = Arc::new(Inspector {
            document: Arc::clone(&document),
            matcher: Arc::clone(&matcher),
            background: background.clone(),
            filters: Arc::clone(&filters),
            theme: ThemeCache::new(config.theme.cache_ttl()),
            overlays: Mutex::new(HashMap::new()),
        });
        let scheduler = Arc::new(BatchScheduler::new(
            inspector.clone(),
            pipeline.batch_delay(),
            Dispatcher::new(pipeline.concurrency),
        ));
        let feed = ChangeFeed::new(matcher, scheduler.clone(), pipeline.frame_interval());

        Ok(Self {
            document,
            storage,
            background,
            filters,
            inspector,
            scheduler,
            feed,
            running: Mutex::new(None),
        })
    }

    /// Load filters and start monitoring if there are any.
    /// Returns whether monitoring is active.
    pub async fn start(&self) -> bool {
        if self.reload_filters().await == 0 {
            info!("no filters set, monitoring not started");
            return false;
        }
        self.ensure_running();
        true
    }

    /// The stored filters changed: re-read filters, drop cached verdicts and
    /// start or stop monitoring to match. Returns whether monitoring is active.
    ///
    /// Filters are swapped in before the clear, so no check issued after the
    /// clear can still carry the old list.
    pub async fn filters_changed(&self) -> bool {
        let count = self.reload_filters().await;
        if let Err(e) = self.background.clear_cache().await {
            warn!(error = %e, "verdict cache clear failed");
        }
        if count == 0 {
            self.stop().await;
            return false;
        }
        self.ensure_running();
        true
    }

    /// Stop watching the document. Queued candidates still drain.
    pub async fn stop(&self) -> bool {
        let run = self.running.lock().take();
        let Some(run) = run else {
            return false;
        };
        run.token.cancel();
        if let Err(e) = run.task.await {
            warn!(error = %e, "change feed task failed");
        }
        info!("monitoring stopped");
        true
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn filters(&self) -> Vec<UserFilter> {
        self.filters.read().clone()
    }

    pub fn overlay_for(&self, element: &Element) -> Option<Arc<Overlay>> {
        self.inspector.overlay_for(element)
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    async fn reload_filters(&self) -> usize {
        let loaded = match self.storage.load_filters().await {
            Ok(filters) => filters,
            Err(e) => {
                warn!(error = %e, "filter load failed, treating as empty");
                Vec::new()
            }
        };
        let count = loaded.len();
        *self.filters.write() = loaded;
        debug!(count, "filters_loaded");
        count
    }

    /// Attach the feed, then scan what is already in the document. No-op if
    /// already running.
    fn ensure_running(&self) {
        {
            let mut running = self.running.lock();
            if running.is_some() {
                return;
            }
            let token = CancellationToken::new();
            let task = self.feed.attach(&self.document, token.clone());
            *running = Some(FeedRun { token, task });
        }
        let queued = self.feed.scan(&self.document);
        info!(queued, "monitoring started");
    }
}
