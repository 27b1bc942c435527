//! Running classification counters with debounced persistence.
//! Every processed item bumps the counters; the write to storage is
//! coalesced so a burst of checks produces at most one save per interval.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::MediaKind;
use crate::debounce::{ArmPolicy, Debouncer};
use crate::error::FilterError;
use crate::storage::Storage;

pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub images_blocked: u64,
    pub videos_blocked: u64,
    pub total_checked: u64,
}

impl Stats {
    pub fn record(&mut self, kind: MediaKind, blocked: bool) {
        self.total_checked += 1;
        if blocked {
            match kind {
                MediaKind::Image => self.images_blocked += 1,
                MediaKind::Video => self.videos_blocked += 1,
            }
        }
    }
}

pub struct StatsRecorder {
    counters: Arc<Mutex<Stats>>,
    store: Arc<dyn Storage>,
    save: Debouncer,
}

impl StatsRecorder {
    pub fn new(store: Arc<dyn Storage>, initial: Stats, save_interval: Duration) -> Self {
        Self {
            counters: Arc::new(Mutex::new(initial)),
            store,
            save: Debouncer::new("stats_save", save_interval, ArmPolicy::Coalesce),
        }
    }

    /// Start from the persisted counters. A failed read starts from zero.
    pub async fn load(store: Arc<dyn Storage>, save_interval: Duration) -> Self {
        let initial = match store.load_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "stats load failed, starting from zero");
                Stats::default()
            }
        };
        debug!(?initial, "stats_loaded");
        Self::new(store, initial, save_interval)
    }

    /// Count one successfully classified item and schedule a save.
    pub fn record(&self, kind: MediaKind, blocked: bool) {
        self.counters.lock().record(kind, blocked);

        let counters = Arc::clone(&self.counters);
        let store = Arc::clone(&self.store);
        self.save.arm(move || async move {
            let snapshot = *counters.lock();
            match store.save_stats(&snapshot).await {
                Ok(()) => debug!(?snapshot, "stats_saved"),
                Err(e) => warn!(error = %e, "stats save failed"),
            }
        });
    }

    pub fn snapshot(&self) -> Stats {
        *self.counters.lock()
    }

    pub fn save_pending(&self) -> bool {
        self.save.is_pending()
    }

    /// Persist now, dropping any pending debounced save.
    pub async fn flush(&self) -> Result<(), FilterError> {
        self.save.cancel();
        let snapshot = self.snapshot();
        self.store.save_stats(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn blocked_counts_split_by_kind() {
        let mut s = Stats::default();
        s.record(MediaKind::Image, true);
        s.record(MediaKind::Video, true);
        s.record(MediaKind::Video, false);
        assert_eq!(
            s,
            Stats {
                images_blocked: 1,
                videos_blocked: 1,
                total_checked: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_produces_single_write() {
        let store = Arc::new(MemoryStore::new());
        let recorder = StatsRecorder::new(store.clone(), Stats::default(), DEFAULT_SAVE_INTERVAL);

        for _ in 0..50 {
            recorder.record(MediaKind::Image, true);
        }
        assert!(recorder.save_pending());
        assert_eq!(store.stats_writes(), 0);

        tokio::time::sleep(DEFAULT_SAVE_INTERVAL + Duration::from_millis(1)).await;
        assert_eq!(store.stats_writes(), 1);
        assert_eq!(store.load_stats().await.unwrap().images_blocked, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_traffic_still_saves_each_interval() {
        let store = Arc::new(MemoryStore::new());
        let recorder = StatsRecorder::new(store.clone(), Stats::default(), DEFAULT_SAVE_INTERVAL);

        for _ in 0..24 {
            recorder.record(MediaKind::Video, false);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(store.stats_writes(), 2);
    }

    #[tokio::test]
    async fn load_resumes_persisted_counters() {
        let store = Arc::new(MemoryStore::from_json(serde_json::json!({
            "imagesBlocked": 4, "videosBlocked": 2, "totalChecked": 10
        })));
        let recorder = StatsRecorder::load(store.clone(), DEFAULT_SAVE_INTERVAL).await;
        recorder.record(MediaKind::Image, false);
        recorder.flush().await.unwrap();
        assert_eq!(store.load_stats().await.unwrap().total_checked, 11);
        assert!(!recorder.save_pending());
    }
}
