//! Change feed: turns document mutations into media candidates.
//!
//! Mutation bursts are not processed inline. The first burst arms a
//! frame-aligned pass; bursts arriving while that pass is pending or running
//! are parked and picked up by the next frame, never processed concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::classify::MediaKind;
use crate::dom::{Document, Element, ElementId, MutationRecord};
use crate::error::FilterError;

pub const DEFAULT_MEDIA_HOST_PATTERN: &str = r"twimg\.com";
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);
/// Images smaller than this on either side are avatars/icons.
pub const DEFAULT_MIN_MEDIA_PX: u32 = 50;

/// A media element waiting for classification. Non-owning: the element may
/// be gone by the time the candidate is processed.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub element: Weak<Element>,
    pub id: ElementId,
    pub kind: MediaKind,
}

impl Candidate {
    pub fn new(element: &Arc<Element>, kind: MediaKind) -> Self {
        Self {
            element: Arc::downgrade(element),
            id: element.id(),
            kind,
        }
    }
}

/// Receives candidates found by the feed.
pub trait CandidateSink: Send + Sync {
    /// Returns true if the element was newly queued.
    fn offer(&self, element: &Arc<Element>, kind: MediaKind) -> bool;
}

/// Media selection and per-kind URL eligibility.
pub struct MediaMatcher {
    host: Regex,
    min_px: u32,
}

impl MediaMatcher {
    pub fn new(host_pattern: &str, min_px: u32) -> Result<Self, FilterError> {
        let host = Regex::new(host_pattern).map_err(|e| {
            FilterError::Config(format!("invalid media host pattern {host_pattern:?}: {e}"))
        })?;
        Ok(Self { host, min_px })
    }

    /// `img` with a media-host `src` is an image; any `video` is a video
    /// (its poster is validated later).
    pub fn kind_of(&self, el: &Element) -> Option<MediaKind> {
        if el.is("img") {
            return el
                .attr("src")
                .filter(|src| self.host.is_match(src))
                .map(|_| MediaKind::Image);
        }
        if el.is("video") {
            return Some(MediaKind::Video);
        }
        None
    }

    /// URL to classify, or `None` if the element should be skipped.
    /// Images: the `src`, minus avatars and declared-small images.
    /// Videos: the `poster`, which must be on the media host.
    pub fn media_url(&self, el: &Element, kind: MediaKind) -> Option<String> {
        match kind {
            MediaKind::Image => {
                let src = el.attr("src").filter(|s| !s.trim().is_empty())?;
                if src.contains("profile_images") {
                    return None;
                }
                let too_small = |name: &str| el.dimension(name).is_some_and(|px| px < self.min_px);
                if too_small("width") || too_small("height") {
                    return None;
                }
                Some(src)
            }
            MediaKind::Video => el.attr("poster").filter(|p| self.host.is_match(p)),
        }
    }
}

pub struct ChangeFeed {
    matcher: Arc<MediaMatcher>,
    sink: Arc<dyn CandidateSink>,
    frame_interval: Duration,
    pending: Mutex<Vec<MutationRecord>>,
    /// Single in-flight slot for the frame pass. Only flipped under `pending`.
    in_flight: AtomicBool,
}

impl ChangeFeed {
    pub fn new(
        matcher: Arc<MediaMatcher>,
        sink: Arc<dyn CandidateSink>,
        frame_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            matcher,
            sink,
            frame_interval,
            pending: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn matcher(&self) -> &Arc<MediaMatcher> {
        &self.matcher
    }

    /// Offer every matching element already in the document.
    pub fn scan(&self, doc: &Document) -> usize {
        let queued = self.collect(doc.root());
        debug!(queued, "initial_scan_done");
        queued
    }

    /// Offer `node` and each matching descendant. Returns how many were
    /// newly queued.
    pub fn collect(&self, node: &Arc<Element>) -> usize {
        node.subtree()
            .iter()
            .filter_map(|el| self.matcher.kind_of(el).map(|kind| (el, kind)))
            .filter(|(el, kind)| self.sink.offer(el, *kind))
            .count()
    }

    /// Entry point for a mutation burst (zero or more records).
    pub fn on_mutations(self: &Arc<Self>, records: Vec<MutationRecord>) {
        {
            let mut pending = self.pending.lock();
            pending.extend(records);
            if self.in_flight.swap(true, Ordering::AcqRel) {
                trace!(parked = pending.len(), "mutation_burst_deferred");
                return;
            }
        }
        let feed = Arc::clone(self);
        tokio::spawn(async move { feed.run_frames().await });
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn run_frames(&self) {
        loop {
            tokio::time::sleep(self.frame_interval).await;
            let records = std::mem::take(&mut *self.pending.lock());
            let queued: usize = records
                .iter()
                .flat_map(|r| r.added_nodes.iter())
                .map(|node| self.collect(node))
                .sum();
            trace!(records = records.len(), queued, "mutation_frame_processed");

            let pending = self.pending.lock();
            if pending.is_empty() {
                self.in_flight.store(false, Ordering::Release);
                return;
            }
        }
    }

    /// Subscribe to `doc` and feed its mutations in until `token` fires.
    pub fn attach(self: &Arc<Self>, doc: &Document, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = doc.observe();
        let feed = Arc::clone(self);
        tokio::spawn(async move {
            debug!("change_feed_attached");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(mut records) => {
                            while let Ok(more) = rx.try_recv() {
                                records.extend(more);
                            }
                            feed.on_mutations(records);
                        }
                        None => break,
                    },
                }
            }
            debug!("change_feed_detached");
        })
    }
}
