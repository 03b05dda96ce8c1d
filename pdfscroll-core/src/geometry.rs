use serde::{Deserialize, Serialize};

use crate::scale::Rotation;

/// Page dimensions at scale 1 and rotation 0, in device-independent units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle with a top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// Geometry of a page at a concrete scale and rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
    pub rotation: Rotation,
    base: PageSize,
}

impl PageViewport {
    pub fn new(size: PageSize, scale: f32, rotation: Rotation) -> Self {
        let (width, height) = if rotation.is_sideways() {
            (size.height * scale, size.width * scale)
        } else {
            (size.width * scale, size.height * scale)
        };
        Self {
            width,
            height,
            scale,
            rotation,
            base: size,
        }
    }

    pub fn base_size(&self) -> PageSize {
        self.base
    }

    /// Backing-store dimensions for a drawing surface at `pixel_ratio`.
    pub fn pixel_size(&self, pixel_ratio: f32) -> (u32, u32) {
        let ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            pixel_ratio
        } else {
            1.0
        };
        (
            to_pixels(self.width * ratio),
            to_pixels(self.height * ratio),
        )
    }

    /// Maps a rectangle in unscaled, unrotated page space into this viewport.
    /// Rotation is clockwise.
    pub fn convert_rect(&self, rect: Rect) -> Rect {
        let s = self.scale;
        let PageSize { width: w, height: h } = self.base;
        let (x, y, width, height) = match self.rotation {
            Rotation::Deg0 => (rect.x, rect.y, rect.width, rect.height),
            Rotation::Deg90 => (h - rect.bottom(), rect.x, rect.height, rect.width),
            Rotation::Deg180 => (w - rect.right(), h - rect.bottom(), rect.width, rect.height),
            Rotation::Deg270 => (rect.y, w - rect.right(), rect.height, rect.width),
        };
        Rect::new(x * s, y * s, width * s, height * s)
    }
}

fn to_pixels(value: f32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        1
    } else {
        (value.floor() as u32).max(1)
    }
}

/// The container's visible band, in content coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollBand {
    pub scroll_top: f32,
    pub width: f32,
    pub height: f32,
}

impl ScrollBand {
    pub fn new(scroll_top: f32, width: f32, height: f32) -> Self {
        Self {
            scroll_top,
            width,
            height,
        }
    }

    pub fn top(&self) -> f32 {
        self.scroll_top
    }

    pub fn bottom(&self) -> f32 {
        self.scroll_top + self.height
    }

    pub fn center(&self) -> f32 {
        self.scroll_top + self.height / 2.0
    }
}

/// Vertical extent of one page element in content coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpan {
    pub top: f32,
    pub bottom: f32,
}

impl PageSpan {
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Pages stacked top to bottom, separated by `gap`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    spans: Vec<PageSpan>,
    gap: f32,
}

impl PageLayout {
    pub fn new<I>(heights: I, gap: f32) -> Self
    where
        I: IntoIterator<Item = f32>,
    {
        let gap = gap.max(0.0);
        let mut cursor = 0.0;
        let spans = heights
            .into_iter()
            .map(|height| {
                let span = PageSpan {
                    top: cursor,
                    bottom: cursor + height.max(0.0),
                };
                cursor = span.bottom + gap;
                span
            })
            .collect();
        Self { spans, gap }
    }

    pub fn from_viewports(viewports: &[PageViewport], gap: f32) -> Self {
        Self::new(viewports.iter().map(|viewport| viewport.height), gap)
    }

    pub fn spans(&self) -> &[PageSpan] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Span of a 0-indexed page.
    pub fn span(&self, index: usize) -> Option<PageSpan> {
        self.spans.get(index).copied()
    }

    pub fn content_height(&self) -> f32 {
        self.spans.last().map(|span| span.bottom).unwrap_or(0.0)
    }

    pub fn max_scroll_top(&self, band_height: f32) -> f32 {
        (self.content_height() - band_height).max(0.0)
    }

    /// Scroll offset that aligns `target` (content y) according to `align`.
    pub fn scroll_offset_for(&self, target: PageSpan, align: ScrollAlign, band_height: f32) -> f32 {
        let offset = match align {
            ScrollAlign::Start => target.top,
            ScrollAlign::Center => target.top + target.height() / 2.0 - band_height / 2.0,
        };
        offset.clamp(0.0, self.max_scroll_top(band_height))
    }

    pub fn gap(&self) -> f32 {
        self.gap
    }

    /// Locates content offset `y` as a 0-indexed page and the fraction of
    /// that page's height lying above `y`. Offsets in a gap anchor to the
    /// top of the following page.
    pub fn anchor_at(&self, y: f32) -> Option<(usize, f32)> {
        let last = self.spans.len().checked_sub(1)?;
        let index = self.spans.partition_point(|span| span.bottom <= y).min(last);
        let span = self.spans.get(index)?;
        let fraction = if span.height() > 0.0 {
            ((y - span.top) / span.height()).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Some((index, fraction))
    }

    /// Inverse of [`anchor_at`](Self::anchor_at) under this layout.
    pub fn offset_of(&self, index: usize, fraction: f32) -> Option<f32> {
        let span = self.span(index)?;
        Some(span.top + fraction * span.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAlign {
    Start,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}
