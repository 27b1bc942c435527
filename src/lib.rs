//! FeedGuard: filters media in a live-updating feed against user-defined
//! terms using a remote classifier, covering blocked items with a
//! reveal/hide overlay.
//! Main library: component wiring, background worker startup, shutdown.

pub mod cache;
pub mod classify;
pub mod config;
pub mod debounce;
pub mod dedup;
pub mod dispatch;
pub mod dom;
pub mod error;
pub mod messaging;
pub mod observer;
pub mod overlay;
pub mod pipeline;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod theme;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cache::ExpiringCache;
use classify::{ClassificationService, Classifier};
use config::{Config, Logging};
use dom::Document;
use error::FilterError;
use messaging::{spawn_background, BackgroundHandle};
use pipeline::MediaFilter;
use stats::StatsRecorder;
use storage::Storage;

/// Install the global tracing subscriber. `RUST_LOG` overrides
/// `logging.level`. Later calls are ignored.
pub fn init_tracing(logging: &Logging) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        warn!("tracing subscriber already installed");
    }
}

/// A running pipeline: the content-side filter plus the background worker
/// that owns classification.
pub struct FeedGuard {
    filter: MediaFilter,
    background: BackgroundHandle,
    stats: Arc<StatsRecorder>,
    worker: JoinHandle<()>,
}

impl FeedGuard {
    /// Wire every component and start monitoring `document` (if any filters
    /// are stored).
    pub async fn launch(
        config: &Config,
        document: Arc<Document>,
        storage: Arc<dyn Storage>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, FilterError> {
        info!("feedguard starting");

        let stats = Arc::new(
            StatsRecorder::load(Arc::clone(&storage), config.stats.save_interval()).await,
        );
        let cache = ExpiringCache::new(config.cache.capacity, config.cache.ttl());
        let service = Arc::new(ClassificationService::new(
            classifier,
            cache,
            Arc::clone(&stats),
        ));
        let (background, worker) = spawn_background(service);

        let filter = MediaFilter::new(config, document, storage, background.clone())?;
        let monitoring = filter.start().await;

        info!(monitoring, "feedguard setup complete");
        Ok(Self {
            filter,
            background,
            stats,
            worker,
        })
    }

    pub fn filter(&self) -> &MediaFilter {
        &self.filter
    }

    pub fn background(&self) -> &BackgroundHandle {
        &self.background
    }

    pub fn stats(&self) -> &Arc<StatsRecorder> {
        &self.stats
    }

    /// Stop monitoring, finish checks already queued, wait for the worker to
    /// exit and persist counters.
    pub async fn shutdown(self) -> Result<(), FilterError> {
        let FeedGuard {
            filter,
            background,
            stats,
            worker,
        } = self;

        filter.stop().await;
        let flushed = filter.scheduler().flush().await;
        if flushed.items > 0 {
            debug!(items = flushed.items, "queued candidates drained at shutdown");
        }
        drop(filter);
        drop(background);
        if let Err(e) = worker.await {
            warn!(error = %e, "background worker failed");
        }

        stats.flush().await?;
        info!("feedguard stopped");
        Ok(())
    }
}
