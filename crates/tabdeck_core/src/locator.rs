//! Page Media Locator
//!
//! Finds the controllable media on a page, ranks it, and resolves the single
//! element that page-local commands act on.
//!
//! # Ranking
//! 1. Playing before paused
//! 2. Vertical center closest to the viewport midpoint
//! 3. Larger rendered area, then larger intrinsic area
//!
//! The element last resolved as active is remembered through a `Weak`
//! handle and pinned to the front of later scans while it still qualifies,
//! so a re-rank does not make the target jump between elements.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::config::{LocatorConfig, MiniPreviewThresholds};
use crate::host::{MediaDocument, MediaElement, MediaKind, ReadyState, Viewport};

/// Heuristic for muted autoplay thumbnails
pub fn is_mini_preview(media: &dyn MediaElement, thresholds: &MiniPreviewThresholds) -> bool {
    if media.kind() != MediaKind::Video {
        return false;
    }
    let silent = media.muted() || media.volume() == 0.0;
    if !silent {
        return false;
    }

    let (cw, ch) = media.client_size();
    let (iw, ih) = media.intrinsic_size();
    let below = |w: f64, h: f64| w < thresholds.tiny_width || h < thresholds.tiny_height;
    let tiny = below(cw, ch) || below(iw, ih);
    let small = cw < thresholds.small_width
        || ch < thresholds.small_height
        || iw < thresholds.small_width
        || ih < thresholds.small_height;

    (tiny || small) && media.current_time() < thresholds.max_current_time
}

/// Sort key for one candidate
struct Ranked {
    media: Arc<dyn MediaElement>,
    playing: bool,
    distance: f64,
    rendered_area: f64,
    intrinsic_area: f64,
}

impl Ranked {
    fn new(media: Arc<dyn MediaElement>, viewport: &Viewport) -> Self {
        let rect = media.rect();
        let (iw, ih) = media.intrinsic_size();
        Self {
            playing: !media.paused(),
            distance: (rect.center_y() - viewport.height / 2.0).abs(),
            rendered_area: rect.area(),
            intrinsic_area: iw.max(0.0) * ih.max(0.0),
            media,
        }
    }

    fn compare(&self, other: &Self) -> Ordering {
        other
            .playing
            .cmp(&self.playing)
            .then(self.distance.total_cmp(&other.distance))
            .then(other.rendered_area.total_cmp(&self.rendered_area))
            .then(other.intrinsic_area.total_cmp(&self.intrinsic_area))
    }
}

/// Per-page discovery and active-media resolution
pub struct MediaLocator {
    config: LocatorConfig,
    /// Most recent scan, as used by resolution and cycling
    candidates: Vec<Weak<dyn MediaElement>>,
    selected: usize,
    remembered: Option<Weak<dyn MediaElement>>,
}

impl MediaLocator {
    pub fn new(config: LocatorConfig) -> Self {
        Self {
            config,
            candidates: Vec::new(),
            selected: 0,
            remembered: None,
        }
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Nested frames and blacklisted pages never report media
    pub fn reporting_allowed(&self, document: &dyn MediaDocument) -> bool {
        document.is_top_frame() && !self.config.is_blacklisted(&document.url())
    }

    /// Visibility and validity filter
    pub fn qualifies(&self, media: &dyn MediaElement, viewport: &Viewport) -> bool {
        let rect = media.rect();
        let min = self.config.min_visible_size;
        let visible = rect.width > min
            && rect.height > min
            && rect.bottom() > 0.0
            && rect.top() < viewport.height;

        visible
            && media.is_connected()
            && !media.ended()
            && media.ready_state() >= ReadyState::HaveCurrentData
            && !is_mini_preview(media, &self.config.mini_preview)
    }

    /// Qualifying media in rank order, without the sticky element
    pub fn ranked(&self, document: &dyn MediaDocument) -> Vec<Arc<dyn MediaElement>> {
        let viewport = document.viewport();
        let mut ranked: Vec<Ranked> = document
            .media_elements()
            .into_iter()
            .filter(|m| self.qualifies(m.as_ref(), &viewport))
            .map(|m| Ranked::new(m, &viewport))
            .collect();
        // sort_by is stable: ties keep document order
        ranked.sort_by(|a, b| a.compare(b));
        ranked.into_iter().map(|r| r.media).collect()
    }

    /// Ranked candidates with the remembered element pinned first
    pub fn scan(&self, document: &dyn MediaDocument) -> Vec<Arc<dyn MediaElement>> {
        let mut list = self.ranked(document);
        if let Some(sticky) = self.remembered_element() {
            if let Some(pos) = list.iter().position(|m| m.id() == sticky.id()) {
                let pinned = list.remove(pos);
                list.insert(0, pinned);
            }
        }
        list
    }

    /// The element page-local commands act on
    pub fn resolve_active(&mut self, document: &dyn MediaDocument) -> Option<Arc<dyn MediaElement>> {
        if let Some(media) = self
            .candidates
            .get(self.selected)
            .and_then(Weak::upgrade)
            .filter(|m| m.is_connected())
        {
            self.remember(&media);
            return Some(media);
        }

        let fresh = self.scan(document);
        self.candidates = fresh.iter().map(Arc::downgrade).collect();
        self.selected = 0;
        if let Some(first) = fresh.into_iter().next() {
            self.remember(&first);
            return Some(first);
        }

        if let Some(media) = self.remembered_element() {
            debug!("Falling back to remembered media {:?}", media.id());
            return Some(media);
        }
        document.pip_element().filter(|m| m.is_connected())
    }

    /// Advance the local selection over one fresh scan.
    ///
    /// Returns the new 0-based index, the candidate count and the element.
    pub fn cycle(
        &mut self,
        document: &dyn MediaDocument,
    ) -> Option<(usize, usize, Arc<dyn MediaElement>)> {
        let list = self.ranked(document);
        if list.is_empty() {
            self.candidates.clear();
            self.selected = 0;
            return None;
        }
        let next = if self.candidates.is_empty() {
            0
        } else {
            (self.selected + 1) % list.len()
        };
        self.candidates = list.iter().map(Arc::downgrade).collect();
        self.selected = next;
        let media = Arc::clone(&list[next]);
        self.remember(&media);
        Some((next, list.len(), media))
    }

    /// 0-based selection and candidate count of the last scan
    pub fn position(&self) -> (usize, usize) {
        (self.selected, self.candidates.len())
    }

    pub fn remember(&mut self, media: &Arc<dyn MediaElement>) {
        self.remembered = Some(Arc::downgrade(media));
    }

    /// Remembered element, if still alive and attached
    pub fn remembered_element(&self) -> Option<Arc<dyn MediaElement>> {
        self.remembered
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|m| m.is_connected())
    }

    /// Drop cached scan results (e.g. after navigation)
    pub fn invalidate(&mut self) {
        self.candidates.clear();
        self.selected = 0;
    }
}
