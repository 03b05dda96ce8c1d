//! Current-page tracking from scroll position.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::config::TrackingConfig;
use crate::geometry::{PageLayout, PageSpan, ScrollBand};

/// Trailing-edge debouncer: fires once the input has been quiet for the
/// configured period. Time is passed in so callers control the clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    /// Records input at `now`, pushing the deadline back.
    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Returns `true` exactly once per burst, when `now` has reached the
    /// deadline.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Fraction of `span` inside `band`, relative to the span's own height.
pub fn visibility_ratio(span: PageSpan, band: ScrollBand) -> f32 {
    let height = span.height();
    if height <= 0.0 {
        return 0.0;
    }
    let visible = (span.bottom.min(band.bottom()) - span.top.max(band.top())).max(0.0);
    visible / height
}

/// Picks the page under the reader as `(0-indexed page, its ratio)`.
///
/// A page straddling the band's vertical center always wins; otherwise the
/// page with the highest ratio wins, earlier pages winning ties.
pub fn most_visible_page(band: ScrollBand, layout: &PageLayout) -> Option<(usize, f32)> {
    let center = band.center();
    let mut best: Option<(usize, f32)> = None;
    let mut straddling: Option<(usize, f32)> = None;

    for (index, span) in layout.spans().iter().enumerate() {
        let ratio = visibility_ratio(*span, band);
        if best.map_or(true, |(_, top)| ratio > top) {
            best = Some((index, ratio));
        }
        if straddling.is_none() && span.top <= center && span.bottom >= center {
            straddling = Some((index, ratio));
        }
    }
    straddling.or(best)
}

/// Debounced current-page tracker.
#[derive(Debug, Clone)]
pub struct PageTracker {
    debouncer: Debouncer,
    threshold: f32,
}

impl PageTracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            debouncer: Debouncer::new(config.debounce),
            threshold: config.visibility_threshold,
        }
    }

    pub fn on_scroll(&mut self, now: Instant) {
        self.debouncer.touch(now);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Evaluates once the debounce period has elapsed. Returns the new
    /// 1-indexed page when it differs from `current`.
    pub fn poll(
        &mut self,
        now: Instant,
        band: ScrollBand,
        layout: &PageLayout,
        current: usize,
    ) -> Option<usize> {
        if !self.debouncer.fire(now) {
            return None;
        }
        self.evaluate(band, layout, current)
    }

    /// Immediate evaluation, used on mount and after a document change.
    pub fn evaluate(&self, band: ScrollBand, layout: &PageLayout, current: usize) -> Option<usize> {
        let (index, ratio) = most_visible_page(band, layout)?;
        let page = index + 1;
        trace!(page, ratio, "page visibility evaluated");
        (page != current && ratio >= self.threshold).then_some(page)
    }

    pub fn reset(&mut self) {
        self.debouncer.cancel();
    }
}
