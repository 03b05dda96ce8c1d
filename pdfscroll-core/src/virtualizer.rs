//! Page virtualization: which pages are materialized for a scroll position,
//! and the render jobs that materialize them.

use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::backend::{Annotation, CancelToken, DrawingSurface, PageHandle, TextContent};
use crate::error::{Result, ViewerError};
use crate::geometry::{PageLayout, PageSize, PageViewport, Rect, ScrollBand};
use crate::scale::Rotation;

/// Pages kept materialized on each side of the core range.
pub const RANGE_BUFFER: usize = 2;

/// Inclusive range of 0-indexed pages that should be materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

#[allow(clippy::len_without_is_empty)]
impl VisibleRange {
    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    /// Number of pages in the range; never zero.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Computes the materialized range for `band` over `layout`.
///
/// The core range drops pages that end more than one band-height above the
/// visible top, and pages that start more than two band-heights below it.
/// It is then widened by [`RANGE_BUFFER`] on both sides; near either end of
/// the document the buffer is shifted so the range still spans
/// `2 * RANGE_BUFFER` pages past its start when enough pages exist.
pub fn compute_visible_range(band: ScrollBand, layout: &PageLayout) -> Option<VisibleRange> {
    let count = layout.len();
    if count == 0 {
        return None;
    }
    let last = count - 1;
    let low_cut = band.top() - band.height;
    let high_cut = band.top() + 2.0 * band.height;

    let mut start = 0;
    let mut end = last;
    for (index, span) in layout.spans().iter().enumerate() {
        if span.bottom < low_cut {
            start = index + 1;
        }
        if span.top > high_cut {
            end = index.saturating_sub(1);
            break;
        }
    }
    let start = start.min(last);
    let end = end.max(start);

    let mut start = start.saturating_sub(RANGE_BUFFER);
    let mut end = (end + RANGE_BUFFER).min(last);

    let min_span = 2 * RANGE_BUFFER;
    if end - start < min_span {
        if start == 0 {
            end = end.max(min_span.min(last));
        } else {
            start = start.min(end.saturating_sub(min_span));
        }
    }
    Some(VisibleRange { start, end })
}

/// Text runs positioned in viewport space, ready for hit-testing and find.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextLayer {
    pub spans: Vec<TextSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    /// Viewport space.
    pub rect: Rect,
    /// Unscaled, unrotated page space.
    pub page_rect: Rect,
}

impl TextLayer {
    pub fn build(content: &TextContent, viewport: &PageViewport) -> Self {
        let spans = content
            .items
            .iter()
            .filter(|item| !item.text.is_empty())
            .map(|item| TextSpan {
                text: item.text.clone(),
                rect: viewport.convert_rect(item.rect),
                page_rect: item.rect,
            })
            .collect();
        Self { spans }
    }

    pub fn text(&self) -> String {
        self.spans
            .iter()
            .map(|span| span.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A fully materialized page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub surface: DrawingSurface,
    pub viewport: PageViewport,
    pub text_layer: Option<TextLayer>,
    /// Annotations with rectangles already in viewport space.
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

/// Parameters a rendered page depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub scale: f32,
    pub rotation: Rotation,
    pub pixel_ratio: f32,
    pub text_layer: bool,
    pub annotation_layer: bool,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation: Rotation::Deg0,
            pixel_ratio: 1.0,
            text_layer: true,
            annotation_layer: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Placeholder,
    Rendering,
    Rendered,
    Failed,
}

/// Host-facing snapshot of one page.
#[derive(Debug, Clone)]
pub struct PageView {
    /// 1-indexed.
    pub number: usize,
    pub viewport: PageViewport,
    pub status: PageStatus,
    /// Last completed render. May lag behind `viewport` while a re-render for
    /// new parameters is in flight.
    pub rendered: Option<Arc<RenderedPage>>,
}

/// Unit of rasterization work for one page under one set of parameters.
pub struct RenderJob {
    id: JobId,
    page: usize,
    handle: Arc<dyn PageHandle>,
    viewport: PageViewport,
    params: RenderParams,
    cancel: CancelToken,
}

impl RenderJob {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Rasterizes the page, then builds the text and annotation layers.
    /// Each stage re-checks cancellation before continuing.
    #[instrument(skip(self), fields(page = self.page, job = self.id.0))]
    pub async fn run(self) -> RenderOutcome {
        let result = self.execute().await;
        RenderOutcome {
            job: self.id,
            page: self.page,
            result,
        }
    }

    async fn execute(&self) -> Result<RenderedPage> {
        self.cancel.check()?;
        let mut surface = DrawingSurface::for_viewport(&self.viewport, self.params.pixel_ratio);
        self.handle
            .render(&mut surface, &self.viewport, &self.cancel)
            .await?;
        self.cancel.check()?;

        let text_layer = if self.params.text_layer {
            match self.handle.text_content().await {
                Ok(content) => Some(TextLayer::build(&content, &self.viewport)),
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!(%err, "text layer unavailable");
                    None
                }
            }
        } else {
            None
        };
        self.cancel.check()?;

        let annotations = if self.params.annotation_layer {
            match self.handle.annotations().await {
                Ok(annotations) => annotations
                    .into_iter()
                    .map(|annotation| Annotation {
                        rect: self.viewport.convert_rect(annotation.rect),
                        ..annotation
                    })
                    .collect(),
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    warn!(%err, "annotation layer unavailable");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        self.cancel.check()?;

        Ok(RenderedPage {
            surface,
            viewport: self.viewport,
            text_layer,
            annotations,
        })
    }
}

#[derive(Debug)]
pub struct RenderOutcome {
    pub job: JobId,
    pub page: usize,
    pub result: Result<RenderedPage>,
}

/// How [`Virtualizer::settle`] treated an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Applied,
    Failed,
    Cancelled,
    /// The job was no longer the page's active job.
    Stale,
}

struct JobSlot {
    id: JobId,
    cancel: CancelToken,
    params: RenderParams,
    finished: bool,
}

enum PageContent {
    Placeholder,
    Rendered(Arc<RenderedPage>),
    Failed,
}

struct PageEntry {
    handle: Arc<dyn PageHandle>,
    size: PageSize,
    viewport: PageViewport,
    slot: Option<JobSlot>,
    content: PageContent,
}

/// Owns per-page render state for the attached document.
pub struct Virtualizer {
    entries: Vec<PageEntry>,
    params: RenderParams,
    range: Option<VisibleRange>,
    queued: Vec<RenderJob>,
    next_job: u64,
}

impl Virtualizer {
    pub fn new(params: RenderParams) -> Self {
        Self {
            entries: Vec::new(),
            params,
            range: None,
            queued: Vec::new(),
            next_job: 0,
        }
    }

    /// Replaces the page set. Jobs for the previous pages are cancelled.
    pub fn attach(&mut self, pages: Vec<Arc<dyn PageHandle>>) {
        self.detach();
        self.entries = pages
            .into_iter()
            .map(|handle| {
                let size = handle.size();
                PageEntry {
                    viewport: PageViewport::new(size, self.params.scale, self.params.rotation),
                    handle,
                    size,
                    slot: None,
                    content: PageContent::Placeholder,
                }
            })
            .collect();
    }

    /// Cancels every job and forgets all pages.
    pub fn detach(&mut self) {
        for entry in &mut self.entries {
            if let Some(slot) = entry.slot.take() {
                slot.cancel.cancel();
            }
        }
        for job in self.queued.drain(..) {
            job.cancel.cancel();
        }
        self.entries.clear();
        self.range = None;
    }

    pub fn page_count(&self) -> usize {
        self.entries.len()
    }

    pub fn params(&self) -> RenderParams {
        self.params
    }

    /// Unscaled size of a 1-indexed page.
    pub fn page_size(&self, number: usize) -> Option<PageSize> {
        self.entries.get(number.checked_sub(1)?).map(|entry| entry.size)
    }

    pub fn viewport(&self, number: usize) -> Option<PageViewport> {
        self.entries
            .get(number.checked_sub(1)?)
            .map(|entry| entry.viewport)
    }

    /// Applies new render parameters. Page geometry updates at once; pages
    /// in range are re-rendered on the next [`reconcile`](Self::reconcile).
    pub fn set_params(&mut self, params: RenderParams) {
        self.params = params;
        for entry in &mut self.entries {
            entry.viewport = PageViewport::new(entry.size, params.scale, params.rotation);
        }
    }

    pub fn layout(&self, gap: f32) -> PageLayout {
        PageLayout::new(self.entries.iter().map(|entry| entry.viewport.height), gap)
    }

    pub fn range(&self) -> Option<VisibleRange> {
        self.range
    }

    /// Recomputes the range for `band` and reconciles jobs against it.
    pub fn update(&mut self, band: ScrollBand, gap: f32) -> Option<VisibleRange> {
        let range = compute_visible_range(band, &self.layout(gap));
        if range != self.range {
            trace!(?range, "visible range changed");
        }
        self.range = range;
        self.reconcile();
        range
    }

    /// Ensures each in-range page has exactly one job matching the current
    /// parameters and that out-of-range pages have none.
    pub fn reconcile(&mut self) {
        let params = self.params;
        for index in 0..self.entries.len() {
            let in_range = self.range.is_some_and(|range| range.contains(index));
            let entry = &mut self.entries[index];

            if !in_range {
                if let Some(slot) = entry.slot.take() {
                    slot.cancel.cancel();
                }
                entry.content = PageContent::Placeholder;
                continue;
            }

            let current = entry.slot.as_ref().is_some_and(|slot| slot.params == params);
            if current {
                continue;
            }
            if let Some(slot) = entry.slot.take() {
                slot.cancel.cancel();
            }

            self.next_job += 1;
            let id = JobId(self.next_job);
            let cancel = CancelToken::new();
            entry.slot = Some(JobSlot {
                id,
                cancel: cancel.clone(),
                params,
                finished: false,
            });
            self.queued.push(RenderJob {
                id,
                page: index + 1,
                handle: Arc::clone(&entry.handle),
                viewport: entry.viewport,
                params,
                cancel,
            });
        }
        self.queued.retain(|job| !job.cancel.is_cancelled());
    }

    /// Hands queued jobs to the caller for execution.
    pub fn take_jobs(&mut self) -> Vec<RenderJob> {
        std::mem::take(&mut self.queued)
    }

    /// Applies a finished job if it is still its page's active job.
    pub fn settle(&mut self, outcome: RenderOutcome) -> Settled {
        let Some(entry) = outcome
            .page
            .checked_sub(1)
            .and_then(|index| self.entries.get_mut(index))
        else {
            return Settled::Stale;
        };
        let Some(slot) = entry.slot.as_mut().filter(|slot| slot.id == outcome.job) else {
            trace!(page = outcome.page, "dropping superseded render");
            return Settled::Stale;
        };

        match outcome.result {
            Ok(page) => {
                slot.finished = true;
                entry.content = PageContent::Rendered(Arc::new(page));
                Settled::Applied
            }
            Err(ViewerError::RenderCancelled) => {
                debug!(page = outcome.page, "render cancelled");
                entry.slot = None;
                Settled::Cancelled
            }
            Err(err) => {
                warn!(page = outcome.page, %err, "page render failed");
                slot.finished = true;
                entry.content = PageContent::Failed;
                Settled::Failed
            }
        }
    }

    pub fn page_views(&self) -> Vec<PageView> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let pending = entry.slot.as_ref().is_some_and(|slot| !slot.finished);
                let (status, rendered) = match &entry.content {
                    PageContent::Rendered(page) if !pending => {
                        (PageStatus::Rendered, Some(Arc::clone(page)))
                    }
                    PageContent::Rendered(page) => (PageStatus::Rendering, Some(Arc::clone(page))),
                    PageContent::Failed => (PageStatus::Failed, None),
                    PageContent::Placeholder if pending => (PageStatus::Rendering, None),
                    PageContent::Placeholder => (PageStatus::Placeholder, None),
                };
                PageView {
                    number: index + 1,
                    viewport: entry.viewport,
                    status,
                    rendered,
                }
            })
            .collect()
    }

    /// Text layers of pages rendered under the current parameters, as
    /// `(page number, layer)`.
    pub fn text_layers(&self) -> Vec<(usize, &TextLayer)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match &entry.content {
                PageContent::Rendered(page) if page.viewport == entry.viewport => {
                    page.text_layer.as_ref().map(|layer| (index + 1, layer))
                }
                _ => None,
            })
            .collect()
    }

    /// Number of pages holding an unfinished job.
    pub fn active_jobs(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.slot.as_ref().is_some_and(|slot| !slot.finished))
            .count()
    }
}

impl Drop for Virtualizer {
    fn drop(&mut self) {
        self.detach();
    }
}
