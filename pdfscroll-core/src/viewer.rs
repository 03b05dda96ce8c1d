//! Imperative command surface over one document viewer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::backend::{DocumentProvider, LoadOptions};
use crate::config::ViewerConfig;
use crate::error::Result;
use crate::find::{FindMatch, FindOptions, FindSession};
use crate::geometry::{PageLayout, PageSize, PageViewport, ScrollAlign, ScrollBand, ScrollBehavior};
use crate::guard::{Gesture, GestureDisposition, InteractionGuard, ZoomIntent};
use crate::lifecycle::{DocumentController, LoadOutcome, LoadState, LoadTask, LoadedDocument};
use crate::scale::{self, Rotation, ScalePolicy, ScaleValue};
use crate::source::{SourceInput, SourceResolver};
use crate::store::PersistedViewState;
use crate::tracking::PageTracker;
use crate::virtualizer::{PageView, Settled, VisibleRange, Virtualizer};
use crate::{DocumentInfo, EventLog, ScrollRequest, ViewerEvent};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    /// 1-indexed.
    pub current_page: usize,
    pub current_scale: f32,
    pub current_rotation: Rotation,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            current_page: 1,
            current_scale: 1.0,
            current_rotation: Rotation::Deg0,
        }
    }
}

/// Result of one [`Viewer::render_pending`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub rendered: usize,
    pub failed: usize,
    /// Cancelled or superseded jobs.
    pub discarded: usize,
}

struct ViewerInner {
    state: ViewportState,
    scale_request: ScaleValue,
    attached: Option<u64>,
    band: ScrollBand,
    virtualizer: Virtualizer,
    tracker: PageTracker,
    find: Option<FindSession>,
}

pub struct Viewer {
    config: ViewerConfig,
    resolver: SourceResolver,
    events: EventLog,
    zoom_enabled: Arc<AtomicBool>,
    guard: InteractionGuard,
    controller: DocumentController,
    inner: Mutex<ViewerInner>,
}

impl Viewer {
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        config: ViewerConfig,
        resolver: SourceResolver,
    ) -> Self {
        let events = EventLog::new();
        let zoom_enabled = Arc::new(AtomicBool::new(config.zoom_enabled));
        let state = ViewportState::default();
        let inner = ViewerInner {
            state,
            scale_request: config.initial_scale,
            attached: None,
            band: ScrollBand::default(),
            virtualizer: Virtualizer::new(
                config.render_params(state.current_scale, state.current_rotation),
            ),
            tracker: PageTracker::new(&config.tracking),
            find: None,
        };
        Self {
            guard: InteractionGuard::new(Arc::clone(&zoom_enabled)),
            controller: DocumentController::new(provider, events.clone()),
            zoom_enabled,
            resolver,
            events,
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn load_state(&self) -> LoadState {
        self.controller.state()
    }

    pub fn document_info(&self) -> Option<DocumentInfo> {
        self.controller
            .document()
            .map(|document| document.info().clone())
    }

    /// Resolves `input` and starts loading it. Invalid sources fail here,
    /// before any state changes.
    pub fn load(&self, input: impl Into<SourceInput>, options: LoadOptions) -> Result<LoadTask> {
        let source = self.resolver.resolve(input.into())?;
        let mut inner = self.inner.lock();
        self.detach(&mut inner);
        Ok(self.controller.load(source, options))
    }

    pub fn reload(&self) -> Result<LoadTask> {
        let mut inner = self.inner.lock();
        self.detach(&mut inner);
        self.controller.reload()
    }

    pub fn reload_with_password(&self, password: impl Into<String>) -> Result<LoadTask> {
        let mut inner = self.inner.lock();
        self.detach(&mut inner);
        self.controller.reload_with_password(password)
    }

    /// Drives `task` to completion and, if it committed, attaches the new
    /// document's pages.
    pub async fn settle(&self, task: LoadTask) -> LoadOutcome {
        let outcome = task.settle().await;
        if let LoadOutcome::Ready(document) = &outcome {
            if let Err(err) = self.attach(document).await {
                warn!(%err, "failed to prepare pages");
            }
        }
        outcome
    }

    pub async fn open(&self, input: impl Into<SourceInput>, options: LoadOptions) -> Result<LoadOutcome> {
        let task = self.load(input, options)?;
        Ok(self.settle(task).await)
    }

    /// Cancels all work and destroys the document.
    pub fn teardown(&self) {
        let mut inner = self.inner.lock();
        self.detach(&mut inner);
        self.controller.teardown();
    }

    #[instrument(skip_all, fields(generation = document.generation()))]
    async fn attach(&self, document: &LoadedDocument) -> Result<()> {
        let backend = Arc::clone(document.backend());
        let count = backend.page_count();
        let mut pages = Vec::with_capacity(count);
        for number in 1..=count {
            if !self.controller.is_current(document.generation()) {
                debug!("document replaced while preparing pages");
                return Ok(());
            }
            pages.push(backend.page(number).await?);
        }

        let mut inner = self.inner.lock();
        if !self.controller.is_current(document.generation()) {
            debug!("document replaced while preparing pages");
            return Ok(());
        }
        inner.virtualizer.attach(pages);
        inner.attached = Some(document.generation());
        inner.state.current_page = 1;
        inner.band.scroll_top = 0.0;
        inner.tracker.reset();

        let request = inner.scale_request;
        let scale = self
            .resolve_cached(&inner, request)
            .unwrap_or(inner.state.current_scale);
        inner.state.current_scale = scale;
        let params = self
            .config
            .render_params(scale, inner.state.current_rotation);
        inner.virtualizer.set_params(params);
        self.refresh(&mut inner);
        self.evaluate_now(&mut inner);

        info!(pages = count, scale, "pages attached");
        self.events.push(ViewerEvent::ScaleChanged { scale });
        self.events.push(ViewerEvent::PageChanged {
            page: inner.state.current_page,
        });
        self.events.push(ViewerEvent::RedrawNeeded);
        Ok(())
    }

    /// Flushes every borrower of the current document. Must run before the
    /// controller destroys it.
    fn detach(&self, inner: &mut ViewerInner) {
        inner.virtualizer.detach();
        inner.attached = None;
        inner.tracker.reset();
        if inner.find.take().is_some() {
            self.events.push(ViewerEvent::FindUpdated {
                matches: 0,
                current: None,
            });
        }
    }

    fn refresh(&self, inner: &mut ViewerInner) -> Option<VisibleRange> {
        let layout = inner.virtualizer.layout(self.config.page_gap);
        inner.band.scroll_top = inner
            .band
            .scroll_top
            .clamp(0.0, layout.max_scroll_top(inner.band.height));
        let band = inner.band;
        inner.virtualizer.update(band, self.config.page_gap)
    }

    fn evaluate_now(&self, inner: &mut ViewerInner) {
        let layout = inner.virtualizer.layout(self.config.page_gap);
        if let Some(page) = inner
            .tracker
            .evaluate(inner.band, &layout, inner.state.current_page)
        {
            self.set_current_page(inner, page);
        }
    }

    fn set_current_page(&self, inner: &mut ViewerInner, page: usize) {
        if inner.state.current_page != page {
            inner.state.current_page = page;
            self.events.push(ViewerEvent::PageChanged { page });
        }
    }

    /// Page 1 geometry at scale 1 under the current rotation.
    fn reference_size(inner: &ViewerInner) -> Option<PageSize> {
        let size = inner.virtualizer.page_size(1)?;
        let viewport = PageViewport::new(size, 1.0, inner.state.current_rotation);
        Some(PageSize::new(viewport.width, viewport.height))
    }

    fn resolve_cached(&self, inner: &ViewerInner, value: ScaleValue) -> Option<f32> {
        match value {
            ScaleValue::Numeric(scale) => Some(scale::clamp_scale(scale)),
            ScaleValue::Policy(_) => {
                let page = Self::reference_size(inner)?;
                Some(scale::resolve_scale(
                    value,
                    inner.band.width,
                    inner.band.height,
                    page,
                ))
            }
        }
    }

    fn apply_scale(&self, inner: &mut ViewerInner, scale: f32) -> bool {
        let previous = inner.state.current_scale;
        if (scale - previous).abs() <= f32::EPSILON {
            return false;
        }
        inner.state.current_scale = scale;
        let anchor = self.reading_anchor(inner);
        let params = self
            .config
            .render_params(scale, inner.state.current_rotation);
        inner.virtualizer.set_params(params);
        self.restore_anchor(inner, anchor);
        self.refresh(&mut *inner);
        debug!(scale, "scale changed");
        self.events.push(ViewerEvent::ScaleChanged { scale });
        self.events.push(ViewerEvent::RedrawNeeded);
        true
    }

    fn apply_rotation(&self, inner: &mut ViewerInner, rotation: Rotation) {
        if inner.state.current_rotation == rotation {
            return;
        }
        inner.state.current_rotation = rotation;
        let anchor = self.reading_anchor(inner);
        let params = self
            .config
            .render_params(inner.state.current_scale, rotation);
        inner.virtualizer.set_params(params);
        self.restore_anchor(inner, anchor);
        self.refresh(&mut *inner);
        debug!(%rotation, "rotation changed");
        self.events.push(ViewerEvent::RotationChanged { rotation });
        self.events.push(ViewerEvent::RedrawNeeded);
    }

    /// Page at the top of the band and how far into it the band starts.
    fn reading_anchor(&self, inner: &ViewerInner) -> Option<(usize, f32)> {
        inner
            .virtualizer
            .layout(self.config.page_gap)
            .anchor_at(inner.band.scroll_top)
    }

    /// Moves the band so the anchored page position is back at its top.
    fn restore_anchor(&self, inner: &mut ViewerInner, anchor: Option<(usize, f32)>) {
        let Some((index, fraction)) = anchor else {
            return;
        };
        let layout = inner.virtualizer.layout(self.config.page_gap);
        if let Some(top) = layout.offset_of(index, fraction) {
            inner.band.scroll_top = top;
        }
    }

    fn request_scroll(&self, page: usize, offset: f32, align: ScrollAlign) {
        self.events.push(ViewerEvent::ScrollRequested(ScrollRequest {
            page,
            offset,
            align,
            behavior: ScrollBehavior::Smooth,
        }));
    }

    // Navigation.

    /// Clamps `page` to the document and requests a scroll to its top.
    /// Returns the page navigated to, or `None` without a document.
    pub fn go_to_page(&self, page: usize) -> Option<usize> {
        let mut inner = self.inner.lock();
        let total = inner.virtualizer.page_count();
        if total == 0 {
            return None;
        }
        let page = page.clamp(1, total);
        self.set_current_page(&mut inner, page);
        inner.tracker.reset();

        let layout = inner.virtualizer.layout(self.config.page_gap);
        let span = layout.span(page - 1)?;
        let offset = layout.scroll_offset_for(span, ScrollAlign::Start, inner.band.height);
        self.request_scroll(page, offset, ScrollAlign::Start);
        Some(page)
    }

    pub fn next_page(&self) -> Option<usize> {
        let (current, total) = self.position();
        if current >= total {
            return None;
        }
        self.go_to_page(current + 1)
    }

    pub fn previous_page(&self) -> Option<usize> {
        let (current, _) = self.position();
        if current <= 1 {
            return None;
        }
        self.go_to_page(current - 1)
    }

    fn position(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.state.current_page, inner.virtualizer.page_count())
    }

    // Zoom and rotation.

    pub fn zoom_enabled(&self) -> bool {
        self.zoom_enabled.load(Ordering::SeqCst)
    }

    pub fn set_zoom_enabled(&self, enabled: bool) {
        self.zoom_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn zoom_in(&self) -> bool {
        self.zoom_by(scale::zoom_in)
    }

    pub fn zoom_out(&self) -> bool {
        self.zoom_by(scale::zoom_out)
    }

    fn zoom_by(&self, step: fn(f32) -> f32) -> bool {
        if !self.zoom_enabled() {
            return false;
        }
        let mut inner = self.inner.lock();
        let scale = step(inner.state.current_scale);
        inner.scale_request = ScaleValue::Numeric(scale);
        self.apply_scale(&mut inner, scale)
    }

    /// Applies a numeric scale or resolves a policy against page 1. Returns
    /// `false` when zoom is disabled or nothing changed.
    pub async fn set_scale(&self, value: impl Into<ScaleValue>) -> bool {
        if !self.zoom_enabled() {
            return false;
        }
        let value = value.into();
        let policy = match value {
            ScaleValue::Numeric(scale) => {
                let mut inner = self.inner.lock();
                inner.scale_request = value;
                return self.apply_scale(&mut inner, scale::clamp_scale(scale));
            }
            ScaleValue::Policy(policy) => policy,
        };

        let Some(document) = self.controller.document() else {
            self.inner.lock().scale_request = value;
            return false;
        };
        let page = match document.backend().page(1).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%err, policy = policy.as_str(), "cannot resolve scale policy");
                return false;
            }
        };

        let mut inner = self.inner.lock();
        if inner.attached != Some(document.generation()) {
            return false;
        }
        let viewport = PageViewport::new(page.size(), 1.0, inner.state.current_rotation);
        let resolved = scale::resolve_scale(
            value,
            inner.band.width,
            inner.band.height,
            PageSize::new(viewport.width, viewport.height),
        );
        inner.scale_request = value;
        self.apply_scale(&mut inner, resolved)
    }

    /// Relative rotation; not gated by the zoom policy.
    pub fn rotate(&self, delta: i32) -> Result<Rotation> {
        let mut inner = self.inner.lock();
        let rotation = inner.state.current_rotation.rotate(delta)?;
        self.apply_rotation(&mut inner, rotation);
        Ok(rotation)
    }

    /// Absolute rotation. Values outside {0, 90, 180, 270} are rejected and
    /// leave the state untouched.
    pub fn set_rotation(&self, degrees: i32) -> Result<Rotation> {
        let rotation = Rotation::try_from(degrees)?;
        let mut inner = self.inner.lock();
        self.apply_rotation(&mut inner, rotation);
        Ok(rotation)
    }

    // Reads.

    pub fn current_page(&self) -> usize {
        self.inner.lock().state.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.inner.lock().virtualizer.page_count()
    }

    pub fn current_scale(&self) -> f32 {
        self.inner.lock().state.current_scale
    }

    pub fn current_rotation(&self) -> Rotation {
        self.inner.lock().state.current_rotation
    }

    pub fn viewport_state(&self) -> ViewportState {
        self.inner.lock().state
    }

    pub fn band(&self) -> ScrollBand {
        self.inner.lock().band
    }

    pub fn layout(&self) -> PageLayout {
        self.inner.lock().virtualizer.layout(self.config.page_gap)
    }

    pub fn visible_range(&self) -> Option<VisibleRange> {
        self.inner.lock().virtualizer.range()
    }

    pub fn page_views(&self) -> Vec<PageView> {
        self.inner.lock().virtualizer.page_views()
    }

    // Scroll container.

    /// The container's size changed. Policy scales are re-resolved.
    pub fn resize(&self, width: f32, height: f32) {
        let mut inner = self.inner.lock();
        inner.band.width = width.max(0.0);
        inner.band.height = height.max(0.0);
        if let ScaleValue::Policy(_) = inner.scale_request {
            if let Some(scale) = self.resolve_cached(&inner, inner.scale_request) {
                self.apply_scale(&mut inner, scale);
            }
        }
        self.refresh(&mut inner);
        self.evaluate_now(&mut inner);
    }

    /// The container scrolled to `scroll_top`. Returns the new range.
    pub fn on_scroll(&self, scroll_top: f32, now: Instant) -> Option<VisibleRange> {
        let mut inner = self.inner.lock();
        inner.band.scroll_top = scroll_top;
        inner.tracker.on_scroll(now);
        self.refresh(&mut inner)
    }

    pub fn scroll_by(&self, delta: f32, now: Instant) -> Option<VisibleRange> {
        let top = self.band().scroll_top + delta;
        self.on_scroll(top, now)
    }

    /// Runs a due page-tracking evaluation. Returns the new current page.
    pub fn tick(&self, now: Instant) -> Option<usize> {
        let mut inner = self.inner.lock();
        let layout = inner.virtualizer.layout(self.config.page_gap);
        let current = inner.state.current_page;
        let band = inner.band;
        let page = inner.tracker.poll(now, band, &layout, current)?;
        self.set_current_page(&mut inner, page);
        Some(page)
    }

    pub fn next_tick(&self) -> Option<Instant> {
        self.inner.lock().tracker.deadline()
    }

    /// Runs every queued render job concurrently and applies the results.
    pub async fn render_pending(&self) -> RenderReport {
        let jobs = self.inner.lock().virtualizer.take_jobs();
        let mut report = RenderReport::default();
        if jobs.is_empty() {
            return report;
        }

        let mut running = JoinSet::new();
        for job in jobs {
            running.spawn(job.run());
        }
        while let Some(joined) = running.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(%err, "render task aborted");
                    report.discarded += 1;
                    continue;
                }
            };
            match self.inner.lock().virtualizer.settle(outcome) {
                Settled::Applied => report.rendered += 1,
                Settled::Failed => report.failed += 1,
                Settled::Cancelled | Settled::Stale => report.discarded += 1,
            }
        }
        if report.rendered > 0 || report.failed > 0 {
            self.events.push(ViewerEvent::RedrawNeeded);
        }
        report
    }

    // Find.

    /// Searches the materialized text layers and scrolls the first match
    /// into view. Returns the match count.
    pub fn find(&self, query: &str, options: FindOptions) -> usize {
        let mut inner = self.inner.lock();
        let session = FindSession::search(query, options, inner.virtualizer.text_layers());
        let matches = session.matches().len();
        if let Some(first) = session.current() {
            self.reveal_match(&inner, first);
        }
        self.events.push(ViewerEvent::FindUpdated {
            matches,
            current: session.current_index(),
        });
        inner.find = Some(session);
        matches
    }

    pub fn find_next(&self) -> Option<FindMatch> {
        self.step_find(true)
    }

    pub fn find_previous(&self) -> Option<FindMatch> {
        self.step_find(false)
    }

    fn step_find(&self, forward: bool) -> Option<FindMatch> {
        let mut inner = self.inner.lock();
        let session = inner.find.as_mut()?;
        let found = if forward {
            session.next()
        } else {
            session.previous()
        }
        .cloned()?;
        let (matches, current) = (session.matches().len(), session.current_index());

        self.reveal_match(&inner, &found);
        self.events
            .push(ViewerEvent::FindUpdated { matches, current });
        Some(found)
    }

    fn reveal_match(&self, inner: &ViewerInner, found: &FindMatch) {
        let layout = inner.virtualizer.layout(self.config.page_gap);
        let Some(viewport) = inner.virtualizer.viewport(found.page) else {
            return;
        };
        if let Some(span) = layout.span(found.page - 1) {
            let center = span.top + found.rect_in(&viewport).center_y();
            let offset = (center - inner.band.height / 2.0)
                .clamp(0.0, layout.max_scroll_top(inner.band.height));
            self.request_scroll(found.page, offset, ScrollAlign::Center);
        }
    }

    pub fn clear_find(&self) {
        if self.inner.lock().find.take().is_some() {
            self.events.push(ViewerEvent::FindUpdated {
                matches: 0,
                current: None,
            });
        }
    }

    pub fn find_session(&self) -> Option<FindSession> {
        self.inner.lock().find.clone()
    }

    // Raw input.

    /// Filters a gesture through the interaction guard and performs the
    /// zoom it asks for when it passes.
    pub fn handle_gesture(&self, gesture: &Gesture) -> GestureDisposition {
        let disposition = self.guard.filter(gesture);
        if disposition == GestureDisposition::Suppress {
            debug!(?gesture, "zoom gesture suppressed");
            return disposition;
        }
        match gesture.zoom_intent() {
            Some(ZoomIntent::In) => {
                self.zoom_in();
            }
            Some(ZoomIntent::Out) => {
                self.zoom_out();
            }
            Some(ZoomIntent::Reset) => {
                let mut inner = self.inner.lock();
                inner.scale_request = ScalePolicy::PageActual.into();
                self.apply_scale(&mut inner, 1.0);
            }
            None => {}
        }
        disposition
    }

    // Persistence.

    pub fn persisted_state(&self) -> PersistedViewState {
        let inner = self.inner.lock();
        PersistedViewState {
            page: inner.state.current_page,
            scale: inner.scale_request,
            rotation: inner.state.current_rotation,
        }
    }

    /// Reapplies a saved reading position to the attached document.
    pub fn restore(&self, saved: &PersistedViewState) {
        {
            let mut inner = self.inner.lock();
            self.apply_rotation(&mut inner, saved.rotation);
            if self.zoom_enabled() {
                if let Some(scale) = self.resolve_cached(&inner, saved.scale) {
                    inner.scale_request = saved.scale;
                    self.apply_scale(&mut inner, scale);
                }
            }
        }
        self.go_to_page(saved.page);
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use url::Url;

    use crate::geometry::Rect;
    use crate::lifecycle::LoadPhase;
    use crate::testing::{FakeDocument, FakeProvider, PAGE_HEIGHT};
    use crate::ViewerError;

    fn viewer_with(provider: &Arc<FakeProvider>, config: ViewerConfig) -> Viewer {
        let provider: Arc<dyn DocumentProvider> = provider.clone();
        let resolver = SourceResolver::new(Url::parse("https://example.com/docs/").unwrap());
        Viewer::new(provider, config, resolver)
    }

    fn actual_size() -> ViewerConfig {
        ViewerConfig {
            initial_scale: ScaleValue::Numeric(1.0),
            ..ViewerConfig::default()
        }
    }

    async fn ready(provider: &Arc<FakeProvider>, config: ViewerConfig) -> Viewer {
        let viewer = viewer_with(provider, config);
        viewer.resize(600.0, 800.0);
        let outcome = viewer.open("a.pdf", LoadOptions::default()).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Ready(_)));
        viewer
    }

    fn phases(events: &EventLog) -> Vec<LoadPhase> {
        events
            .snapshot()
            .into_iter()
            .filter_map(|event| match event {
                ViewerEvent::StateChanged(phase) => Some(phase),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn end_to_end_navigation_rotation_and_reload() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(5));
        let viewer = viewer_with(&provider, actual_size());
        viewer.resize(600.0, 800.0);
        assert_eq!(viewer.load_state(), LoadState::Idle);

        let outcome = viewer.open("a.pdf", LoadOptions::default()).await.unwrap();
        let LoadOutcome::Ready(first) = outcome else {
            panic!("expected document");
        };
        assert_eq!(phases(viewer.events()), vec![LoadPhase::Loading, LoadPhase::Ready]);
        assert_eq!(viewer.document_info().unwrap().num_pages, 5);
        assert_eq!(viewer.total_pages(), 5);

        assert_eq!(viewer.go_to_page(5), Some(5));
        assert_eq!(viewer.current_page(), 5);
        assert_eq!(viewer.next_page(), None);
        assert_eq!(viewer.current_page(), 5);

        viewer.set_rotation(90).unwrap();
        viewer.rotate(90).unwrap();
        assert_eq!(viewer.current_rotation(), Rotation::Deg180);

        viewer.events().drain();
        let task = viewer.reload().unwrap();
        let LoadOutcome::Ready(second) = viewer.settle(task).await else {
            panic!("expected reloaded document");
        };
        assert_eq!(phases(viewer.events()), vec![LoadPhase::Loading, LoadPhase::Ready]);
        assert!(!first.is_same_handle(&second));
        assert_eq!(provider.destroy_count("a.pdf"), 1);
    }

    #[tokio::test]
    async fn invalid_sources_fail_synchronously() {
        let provider = Arc::new(FakeProvider::new());
        let viewer = viewer_with(&provider, ViewerConfig::default());
        let result = viewer.load(SourceInput::Other("number".into()), LoadOptions::default());
        assert!(matches!(result, Err(ViewerError::InvalidSource(_))));
        assert_eq!(viewer.load_state(), LoadState::Idle);
        assert!(viewer.events().is_empty());
    }

    #[tokio::test]
    async fn go_to_page_clamps_and_requests_scroll() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(5));
        let viewer = ready(&provider, actual_size()).await;
        viewer.events().drain();

        assert_eq!(viewer.go_to_page(0), Some(1));
        assert_eq!(viewer.go_to_page(99), Some(5));
        assert_eq!(viewer.previous_page(), Some(4));

        let requests: Vec<_> = viewer
            .events()
            .snapshot()
            .into_iter()
            .filter_map(|event| match event {
                ViewerEvent::ScrollRequested(request) => Some(request),
                _ => None,
            })
            .collect();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].page, 4);
        assert_eq!(requests[2].offset, 3.0 * (PAGE_HEIGHT + 10.0));
        assert_eq!(requests[2].align, ScrollAlign::Start);
        assert_eq!(requests[2].behavior, ScrollBehavior::Smooth);
    }

    #[tokio::test]
    async fn navigation_without_document_is_a_no_op() {
        let provider = Arc::new(FakeProvider::new());
        let viewer = viewer_with(&provider, ViewerConfig::default());
        assert_eq!(viewer.go_to_page(3), None);
        assert_eq!(viewer.next_page(), None);
        assert_eq!(viewer.current_page(), 1);
    }

    #[tokio::test]
    async fn scales_are_clamped_and_zoom_steps_invert() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(5));
        let viewer = ready(&provider, actual_size()).await;

        assert!(viewer.set_scale(50.0).await);
        assert_eq!(viewer.current_scale(), 10.0);
        assert!(viewer.set_scale(0.01).await);
        assert_eq!(viewer.current_scale(), 0.1);

        viewer.set_scale(1.5).await;
        assert!(viewer.zoom_in());
        assert!(viewer.zoom_out());
        assert!((viewer.current_scale() - 1.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn policies_resolve_against_first_page() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(3));
        let viewer = ready(&provider, actual_size()).await;
        viewer.resize(1240.0, 800.0);

        assert!(viewer.set_scale(ScalePolicy::PageWidth).await);
        assert!((viewer.current_scale() - 2.0).abs() < 1e-5);

        viewer.set_scale(ScalePolicy::PageFit).await;
        assert!((viewer.current_scale() - 760.0 / 800.0).abs() < 1e-5);

        // Resizing re-resolves the active policy.
        viewer.resize(1240.0, 1640.0);
        assert!((viewer.current_scale() - 2.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn disabled_zoom_leaves_scale_untouched() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(5));
        let config = ViewerConfig {
            zoom_enabled: false,
            ..actual_size()
        };
        let viewer = ready(&provider, config).await;

        assert!(!viewer.zoom_in());
        assert!(!viewer.zoom_out());
        assert!(!viewer.set_scale(3.0).await);
        let gestures = [
            Gesture::Wheel {
                delta_y: -1.0,
                modifiers: crate::Modifiers::CTRL,
            },
            Gesture::Pinch { scale: 2.0 },
            Gesture::Key {
                key: '+',
                modifiers: crate::Modifiers::META,
            },
        ];
        for gesture in gestures {
            assert_eq!(viewer.handle_gesture(&gesture), GestureDisposition::Suppress);
        }
        assert_eq!(viewer.current_scale(), 1.0);

        // Rotation is not gated.
        assert_eq!(viewer.rotate(-90).unwrap(), Rotation::Deg270);

        viewer.set_zoom_enabled(true);
        viewer.handle_gesture(&gestures[0]);
        assert_eq!(viewer.current_scale(), 1.25);
    }

    #[tokio::test]
    async fn invalid_rotation_is_rejected() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(2));
        let viewer = ready(&provider, actual_size()).await;
        assert!(matches!(viewer.set_rotation(45), Err(ViewerError::InvalidRotation(45))));
        assert_eq!(viewer.current_rotation(), Rotation::Deg0);

        viewer.rotate(90).unwrap();
        let layout = viewer.layout();
        assert_eq!(layout.span(0).unwrap().height(), 600.0);
    }

    #[tokio::test]
    async fn tracking_reports_page_after_quiet_period() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(10));
        let viewer = ready(&provider, actual_size()).await;
        assert_eq!(viewer.current_page(), 1);

        let start = Instant::now();
        let page_three = 2.0 * (PAGE_HEIGHT + 10.0);
        viewer.on_scroll(page_three - 200.0, start);
        viewer.on_scroll(page_three, start + Duration::from_millis(30));
        assert_eq!(viewer.tick(start + Duration::from_millis(100)), None);
        assert_eq!(viewer.tick(start + Duration::from_millis(130)), Some(3));
        assert_eq!(viewer.current_page(), 3);
        assert!(viewer
            .events()
            .snapshot()
            .contains(&ViewerEvent::PageChanged { page: 3 }));
    }

    #[tokio::test]
    async fn scale_change_rerenders_visible_pages() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(8));
        let viewer = ready(&provider, actual_size()).await;

        let report = viewer.render_pending().await;
        assert_eq!(report, RenderReport { rendered: 5, failed: 0, discarded: 0 });

        viewer.zoom_in();
        let report = viewer.render_pending().await;
        assert!(report.rendered >= 4);
        let views = viewer.page_views();
        let rendered = views[0].rendered.as_ref().unwrap();
        assert_eq!(rendered.viewport.scale, 1.25);
        assert!(provider.renders().contains(&(1, 1.25)));
    }

    #[tokio::test]
    async fn zoom_and_rotation_keep_the_reading_position() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(50));
        let viewer = ready(&provider, actual_size()).await;

        let start = Instant::now();
        let page_forty = 39.0 * (PAGE_HEIGHT + 10.0);
        viewer.on_scroll(page_forty + PAGE_HEIGHT / 4.0, start);
        viewer.tick(start + Duration::from_millis(150));
        assert_eq!(viewer.current_page(), 40);

        assert!(viewer.set_scale(2.0).await);
        let span = viewer.layout().span(39).unwrap();
        assert!((viewer.band().scroll_top - (span.top + span.height() / 4.0)).abs() < 1e-2);

        viewer.rotate(90).unwrap();
        let span = viewer.layout().span(39).unwrap();
        assert_eq!(span.height(), 1200.0);
        assert!((viewer.band().scroll_top - (span.top + 300.0)).abs() < 1e-2);

        let later = start + Duration::from_secs(1);
        viewer.on_scroll(viewer.band().scroll_top, later);
        viewer.tick(later + Duration::from_millis(150));
        assert_eq!(viewer.current_page(), 40);
    }

    #[tokio::test]
    async fn find_highlights_follow_zoom() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(5).with_text(3, &["Hello World"]));
        let viewer = ready(&provider, actual_size()).await;
        viewer.render_pending().await;

        assert_eq!(viewer.find("hello", FindOptions::default()), 1);
        let found = viewer.find_session().unwrap().current().cloned().unwrap();
        let before = found.rect_in(&viewer.page_views()[2].viewport);
        assert_eq!(before, Rect::new(50.0, 50.0, 50.0, 12.0));

        assert!(viewer.set_scale(2.0).await);
        viewer.render_pending().await;
        let views = viewer.page_views();
        let after = found.rect_in(&views[2].viewport);
        assert_eq!(after, Rect::new(100.0, 100.0, 100.0, 24.0));
        let span = &views[2].rendered.as_ref().unwrap().text_layer.as_ref().unwrap().spans[0];
        assert_eq!((after.x, after.y, after.height), (span.rect.x, span.rect.y, span.rect.height));

        viewer.events().drain();
        viewer.find_next();
        let offset = viewer.events().drain().into_iter().find_map(|event| match event {
            ViewerEvent::ScrollRequested(request) => Some(request.offset),
            _ => None,
        });
        // page 3 top at 2x is 2 * 1610, match centre 112 below it, band 800
        assert_eq!(offset, Some(2.0 * 1610.0 + 112.0 - 400.0));
    }

    #[tokio::test]
    async fn bad_pages_do_not_fail_the_document() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(3).with_failing_page(2));
        let viewer = ready(&provider, actual_size()).await;
        let report = viewer.render_pending().await;
        assert_eq!(report.rendered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(viewer.load_state().phase(), LoadPhase::Ready);
    }

    #[tokio::test]
    async fn find_marks_and_cycles_matches() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(3).with_text(1, &["Hello World"]));
        let viewer = ready(&provider, actual_size()).await;
        viewer.render_pending().await;

        let options = FindOptions {
            case_sensitive: false,
            ..FindOptions::default()
        };
        viewer.events().drain();
        assert_eq!(viewer.find("hello", options), 1);
        assert!(viewer.events().drain().iter().any(|event| matches!(
            event,
            ViewerEvent::ScrollRequested(ScrollRequest { page: 1, align: ScrollAlign::Center, .. })
        )));
        let first = viewer.find_next().unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(viewer.find_session().unwrap().current_index(), Some(0));
        assert_eq!(viewer.find_next(), Some(first));

        viewer.clear_find();
        assert!(viewer.find_session().is_none());
        assert_eq!(viewer.find_next(), None);
    }

    #[tokio::test]
    async fn loading_a_new_document_flushes_pages_and_find() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(3).with_text(1, &["needle"]));
        provider.insert("b.pdf", FakeDocument::uniform(7));
        let viewer = ready(&provider, actual_size()).await;
        viewer.render_pending().await;
        viewer.find("needle", FindOptions::default());
        viewer.go_to_page(3);

        let task = viewer.load("b.pdf", LoadOptions::default()).unwrap();
        assert!(viewer.find_session().is_none());
        assert_eq!(viewer.total_pages(), 0);
        assert_eq!(provider.destroy_count("a.pdf"), 1);

        viewer.settle(task).await;
        assert_eq!(viewer.total_pages(), 7);
        assert_eq!(viewer.current_page(), 1);
        assert_eq!(viewer.visible_range(), Some(VisibleRange { start: 0, end: 4 }));
    }

    #[tokio::test]
    async fn superseded_settle_does_not_attach() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(3));
        provider.insert("b.pdf", FakeDocument::uniform(6));
        let viewer = viewer_with(&provider, actual_size());
        viewer.resize(600.0, 800.0);

        let first = viewer.load("a.pdf", LoadOptions::default()).unwrap();
        let second = viewer.load("b.pdf", LoadOptions::default()).unwrap();
        assert!(matches!(viewer.settle(first).await, LoadOutcome::Stale));
        assert_eq!(viewer.total_pages(), 0);
        assert!(matches!(viewer.settle(second).await, LoadOutcome::Ready(_)));
        assert_eq!(viewer.total_pages(), 6);
    }

    #[tokio::test]
    async fn persisted_state_round_trips() {
        let provider = Arc::new(FakeProvider::new());
        provider.insert("a.pdf", FakeDocument::uniform(9));
        let viewer = ready(&provider, actual_size()).await;
        viewer.restore(&PersistedViewState {
            page: 7,
            scale: ScaleValue::Numeric(2.0),
            rotation: Rotation::Deg90,
        });
        assert_eq!(
            viewer.viewport_state(),
            ViewportState {
                current_page: 7,
                current_scale: 2.0,
                current_rotation: Rotation::Deg90,
            }
        );
        assert_eq!(viewer.persisted_state().page, 7);
    }
}
