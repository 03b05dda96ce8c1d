//! Interfaces to the document engine that parses and rasterizes pages.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::{Result, ViewerError};
use crate::geometry::{PageSize, PageViewport, Rect};
use crate::metadata::DocumentMetadata;
use crate::source::SourceDescriptor;

/// Shared cancellation flag checked at every resumption point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`ViewerError::RenderCancelled`] once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ViewerError::RenderCancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Options forwarded to the document engine for one load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub http_headers: BTreeMap<String, String>,
    pub with_credentials: bool,
    /// Base location of character maps for CJK glyphs. Implies packed maps.
    pub cmap_url: Option<String>,
    pub password: Option<String>,
    /// Engine library location, forwarded once to [`crate::worker::configure`].
    pub worker_src: Option<PathBuf>,
}

impl LoadOptions {
    pub fn cmap_packed(&self) -> bool {
        self.cmap_url.is_some()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// RGBA drawing surface. Its logical size is the page viewport; its backing
/// store is scaled by the device pixel ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingSurface {
    pub width: f32,
    pub height: f32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub pixel_ratio: f32,
    pub pixels: Vec<u8>,
}

/// Upper bound on backing-store pixels per surface (4096 × 4096).
pub const MAX_SURFACE_PIXELS: f32 = 16_777_216.0;

impl DrawingSurface {
    /// Sizes the backing store for `viewport` at `pixel_ratio`. When that
    /// would exceed [`MAX_SURFACE_PIXELS`] the ratio is lowered to fit and
    /// the surface records the ratio actually used.
    pub fn for_viewport(viewport: &PageViewport, pixel_ratio: f32) -> Self {
        let requested = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            pixel_ratio
        } else {
            1.0
        };
        let area = viewport.width * viewport.height;
        let pixel_ratio = if area * requested * requested > MAX_SURFACE_PIXELS {
            (MAX_SURFACE_PIXELS / area).sqrt()
        } else {
            requested
        };
        let (pixel_width, pixel_height) = viewport.pixel_size(pixel_ratio);
        Self {
            width: viewport.width,
            height: viewport.height,
            pixel_width,
            pixel_height,
            pixel_ratio,
            pixels: vec![255; pixel_width as usize * pixel_height as usize * 4],
        }
    }

    /// Copies an engine bitmap into the backing store, cropping or padding
    /// when the engine produced a slightly different size.
    pub fn blit_rgba(&mut self, width: u32, height: u32, rgba: &[u8]) {
        let copy_width = width.min(self.pixel_width) as usize;
        let copy_height = height.min(self.pixel_height) as usize;
        let src_stride = width as usize * 4;
        let dst_stride = self.pixel_width as usize * 4;
        for row in 0..copy_height {
            let src = row * src_stride;
            let dst = row * dst_stride;
            let len = copy_width * 4;
            if src + len > rgba.len() {
                break;
            }
            self.pixels[dst..dst + len].copy_from_slice(&rgba[src..src + len]);
        }
    }
}

/// A run of text with its bounds in unscaled, unrotated page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextContent {
    pub items: Vec<TextItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub subtype: String,
    pub rect: Rect,
    pub contents: Option<String>,
    pub uri: Option<String>,
}

/// Opens documents from normalized sources.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(
        &self,
        source: &SourceDescriptor,
        options: &LoadOptions,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn DocumentBackend>>;
}

/// A parsed document. Owned by the lifecycle controller, which calls
/// [`destroy`](Self::destroy) exactly once.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    fn page_count(&self) -> usize;
    fn fingerprints(&self) -> Vec<String>;
    async fn metadata(&self) -> Result<DocumentMetadata>;
    /// Page handle for a 1-indexed page number.
    async fn page(&self, number: usize) -> Result<Arc<dyn PageHandle>>;
    fn destroy(&self) -> Result<()>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    fn number(&self) -> usize;
    fn size(&self) -> PageSize;
    async fn render(
        &self,
        surface: &mut DrawingSurface,
        viewport: &PageViewport,
        cancel: &CancelToken,
    ) -> Result<()>;
    async fn text_content(&self) -> Result<TextContent>;
    async fn annotations(&self) -> Result<Vec<Annotation>>;
}
