//! One-shot claim tracker for media elements.
//! An element is claimed the moment it is enqueued, not when its check
//! completes, so a second mutation for the same element can never queue it
//! again while the first check is still in flight.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::dom::{Element, ElementId};

/// Claimed-set size at which dead entries are pruned on the next claim.
const PRUNE_WATERMARK: usize = 1024;

/// Weak identity set: holds `Weak<Element>` only, so a claimed element that
/// leaves the document is freed as usual and its entry goes dead.
pub struct DedupTracker {
    claimed: Mutex<HashMap<ElementId, Weak<Element>>>,
    prune_at: Mutex<usize>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self {
            claimed: Mutex::new(HashMap::new()),
            prune_at: Mutex::new(PRUNE_WATERMARK),
        }
    }

    /// Returns true exactly once per element identity and claims it.
    pub fn should_enqueue(&self, element: &Arc<Element>) -> bool {
        let mut claimed = self.claimed.lock();
        if claimed.contains_key(&element.id()) {
            return false;
        }
        claimed.insert(element.id(), Arc::downgrade(element));

        let mut prune_at = self.prune_at.lock();
        if claimed.len() >= *prune_at {
            let before = claimed.len();
            claimed.retain(|_, weak| weak.strong_count() > 0);
            trace!(before, after = claimed.len(), "dedup_pruned");
            *prune_at = (claimed.len() * 2).max(PRUNE_WATERMARK);
        }
        true
    }

    pub fn is_claimed(&self, element: &Element) -> bool {
        self.claimed.lock().contains_key(&element.id())
    }

    /// Entries whose element is still alive.
    pub fn live_len(&self) -> usize {
        self.claimed
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for DedupTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_once_per_element() {
        let tracker = DedupTracker::new();
        let img = Element::new("img");
        assert!(tracker.should_enqueue(&img));
        assert!(!tracker.should_enqueue(&img));
        assert!(tracker.is_claimed(&img));

        let other = Element::new("img");
        assert!(tracker.should_enqueue(&other));
    }

    #[test]
    fn does_not_keep_elements_alive() {
        let tracker = DedupTracker::new();
        let img = Element::new("img");
        let weak = Arc::downgrade(&img);
        tracker.should_enqueue(&img);
        assert_eq!(tracker.live_len(), 1);

        drop(img);
        assert!(weak.upgrade().is_none());
        assert_eq!(tracker.live_len(), 0);
    }

    #[test]
    fn prunes_dead_entries_past_watermark() {
        let tracker = DedupTracker::new();
        for _ in 0..PRUNE_WATERMARK + 10 {
            let el = Element::new("img");
            tracker.should_enqueue(&el);
        }
        assert!(tracker.claimed.lock().len() < PRUNE_WATERMARK);
    }
}
