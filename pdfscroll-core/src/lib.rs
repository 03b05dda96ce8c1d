//! Engine-agnostic core of a scrolling, virtualized document viewer.
//!
//! The crate owns the document lifecycle, decides which pages are
//! materialized for a scroll position, resolves scale policies, tracks the
//! page under the reader, and exposes an imperative command surface
//! ([`Viewer`]). Parsing and rasterization are delegated to a
//! [`DocumentProvider`] implementation.

use std::sync::Arc;

use parking_lot::Mutex;

pub mod backend;
pub mod config;
pub mod error;
pub mod find;
pub mod geometry;
pub mod guard;
pub mod lifecycle;
pub mod metadata;
pub mod scale;
pub mod source;
pub mod store;
pub mod tracking;
pub mod viewer;
pub mod virtualizer;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    Annotation, CancelToken, DocumentBackend, DocumentProvider, DrawingSurface, LoadOptions,
    PageHandle, TextContent, TextItem,
};
pub use config::{TrackingConfig, ViewerConfig};
pub use error::{Result, ViewerError};
pub use find::{FindMatch, FindOptions, FindSession};
pub use geometry::{
    PageLayout, PageSize, PageSpan, PageViewport, Rect, ScrollAlign, ScrollBand, ScrollBehavior,
};
pub use guard::{Gesture, GestureDisposition, InteractionGuard, Modifiers, ZoomIntent};
pub use lifecycle::{DocumentController, LoadOutcome, LoadPhase, LoadState, LoadTask, LoadedDocument};
pub use metadata::{DocumentMetadata, PdfDate};
pub use scale::{Rotation, ScalePolicy, ScaleValue};
pub use source::{SourceDescriptor, SourceInput, SourceKind, SourceResolver};
pub use store::{FileViewStateStore, MemoryViewStateStore, PersistedViewState, ViewStateStore};
pub use tracking::{Debouncer, PageTracker};
pub use viewer::{RenderReport, Viewer, ViewportState};
pub use virtualizer::{
    PageStatus, PageView, RenderJob, RenderOutcome, RenderParams, RenderedPage, TextLayer,
    TextSpan, VisibleRange, Virtualizer,
};

/// Summary of a committed document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub num_pages: usize,
    pub fingerprints: Vec<String>,
    pub metadata: DocumentMetadata,
}

impl DocumentInfo {
    pub fn primary_fingerprint(&self) -> Option<&str> {
        self.fingerprints.first().map(String::as_str)
    }
}

/// Request for the host to scroll its container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollRequest {
    /// 1-indexed page the request targets.
    pub page: usize,
    pub offset: f32,
    pub align: ScrollAlign,
    pub behavior: ScrollBehavior,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    StateChanged(LoadPhase),
    DocumentLoaded(DocumentInfo),
    LoadFailed(ViewerError),
    PasswordRequired { incorrect: bool },
    PageChanged { page: usize },
    ScaleChanged { scale: f32 },
    RotationChanged { rotation: Rotation },
    ScrollRequested(ScrollRequest),
    FindUpdated { matches: usize, current: Option<usize> },
    RedrawNeeded,
}

/// Append-only event log shared between the viewer and its host.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ViewerEvent) {
        self.inner.lock().push(event);
    }

    pub fn drain(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn snapshot(&self) -> Vec<ViewerEvent> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
