use std::mem;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfscroll_core::{
    worker, Annotation, CancelToken, DocumentBackend, DocumentMetadata, DocumentProvider,
    DrawingSurface, LoadOptions, PageHandle, PageSize, PageViewport, PdfDate, Rect, Rotation,
    SourceDescriptor, TextContent, TextItem, ViewerError,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::fetch::fetch_source;

/// Environment variable naming a Pdfium library to bind when no engine
/// location was configured.
pub const LIBRARY_PATH_ENV: &str = "PDFSCROLL_PDFIUM_LIBRARY_PATH";

const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x3f6d1c2a_8e0b_5b7e_9c41_d2a7f05e6b13);

type ViewerResult<T> = pdfscroll_core::Result<T>;

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_configured() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(
        &self,
        source: &SourceDescriptor,
        options: &LoadOptions,
        cancel: &CancelToken,
    ) -> ViewerResult<Arc<dyn DocumentBackend>> {
        if let Some(cmap_url) = options.cmap_url.as_deref() {
            debug!(cmap_url, "pdfium embeds its own character maps; ignoring cmap_url");
        }

        let pdfium = Arc::clone(&self.pdfium);
        let source = source.clone();
        let options = options.clone();
        let cancel = cancel.clone();
        let document = tokio::task::spawn_blocking(move || -> Result<PdfiumDocument> {
            let bytes = fetch_source(&source, &options, &cancel)?;
            let fingerprint = Uuid::new_v5(&FINGERPRINT_NAMESPACE, &bytes)
                .simple()
                .to_string();
            let document = PdfiumDocument::parse(pdfium, bytes, options.password.as_deref())?;
            cancel.check()?;
            Ok(document.with_fingerprint(fingerprint))
        })
        .await
        .map_err(ViewerError::backend)??;

        info!(
            pages = document.page_count,
            fingerprint = %document.fingerprint,
            "document parsed"
        );
        Ok(Arc::new(document))
    }
}

/// Live Pdfium document. Pages borrow it through [`Shared`].
struct PdfiumDocument {
    shared: Arc<Shared>,
    page_count: usize,
    fingerprint: String,
}

struct Shared {
    // Declared before `_pdfium` so it drops first.
    document: Mutex<Option<PdfDocument<'static>>>,
    _pdfium: Arc<Pdfium>,
}

impl Shared {
    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let guard = self.document.lock();
        let document = guard
            .as_ref()
            .ok_or_else(|| anyhow!(ViewerError::backend("document already destroyed")))?;
        f(document)
    }

    fn with_page<R, F>(&self, index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.with_document(|document| {
            let page_index: PdfPageIndex = index
                .try_into()
                .map_err(|_| anyhow!("page {} is out of supported range", index + 1))?;
            let page = document
                .pages()
                .get(page_index)
                .with_context(|| format!("page {} out of range", index + 1))?;
            f(&page)
        })
    }
}

impl PdfiumDocument {
    fn parse(pdfium: Arc<Pdfium>, bytes: Vec<u8>, password: Option<&str>) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, password)
            .map_err(|err| anyhow!(map_load_error(err, password.is_some())))?;
        // SAFETY: the returned PdfDocument holds a reference to the Pdfium bindings owned by
        // `pdfium`. It is stored in `Shared::document`, which is declared before
        // `Shared::_pdfium` and therefore dropped first, and `destroy` only ever drops it
        // earlier. The bindings outlive every use of the document.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::from(document.pages().len());

        Ok(Self {
            shared: Arc::new(Shared {
                document: Mutex::new(Some(document)),
                _pdfium: pdfium,
            }),
            page_count,
            fingerprint: String::new(),
        })
    }

    fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = fingerprint;
        self
    }
}

#[async_trait]
impl DocumentBackend for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn fingerprints(&self) -> Vec<String> {
        vec![self.fingerprint.clone()]
    }

    async fn metadata(&self) -> ViewerResult<DocumentMetadata> {
        let metadata = self.shared.with_document(|document| {
            let metadata = document.metadata();
            let text = |tag: PdfDocumentMetadataTagType| {
                metadata
                    .get(tag)
                    .map(|t| t.value().trim().to_owned())
                    .filter(|value| !value.is_empty())
            };
            Ok(DocumentMetadata {
                title: text(PdfDocumentMetadataTagType::Title),
                author: text(PdfDocumentMetadataTagType::Author),
                subject: text(PdfDocumentMetadataTagType::Subject),
                keywords: text(PdfDocumentMetadataTagType::Keywords),
                creator: text(PdfDocumentMetadataTagType::Creator),
                producer: text(PdfDocumentMetadataTagType::Producer),
                creation_date: text(PdfDocumentMetadataTagType::CreationDate)
                    .and_then(|raw| PdfDate::parse(&raw)),
                modification_date: text(PdfDocumentMetadataTagType::ModificationDate)
                    .and_then(|raw| PdfDate::parse(&raw)),
            })
        })?;
        Ok(metadata)
    }

    async fn page(&self, number: usize) -> ViewerResult<Arc<dyn PageHandle>> {
        if number == 0 || number > self.page_count {
            return Err(ViewerError::PageOutOfRange {
                page: number,
                page_count: self.page_count,
            });
        }
        let index = number - 1;
        let size = self.shared.with_page(index, |page| {
            Ok(PageSize::new(page.width().value, page.height().value))
        })?;
        Ok(Arc::new(PdfiumPage {
            shared: Arc::clone(&self.shared),
            index,
            size,
        }))
    }

    fn destroy(&self) -> ViewerResult<()> {
        let released = self.shared.document.lock().take();
        if released.is_none() {
            warn!(fingerprint = %self.fingerprint, "document destroyed twice");
        }
        Ok(())
    }
}

struct PdfiumPage {
    shared: Arc<Shared>,
    index: usize,
    size: PageSize,
}

#[async_trait]
impl PageHandle for PdfiumPage {
    fn number(&self) -> usize {
        self.index + 1
    }

    fn size(&self) -> PageSize {
        self.size
    }

    #[instrument(skip(self, surface, cancel), fields(page = self.index + 1))]
    async fn render(
        &self,
        surface: &mut DrawingSurface,
        viewport: &PageViewport,
        cancel: &CancelToken,
    ) -> ViewerResult<()> {
        cancel.check()?;
        let shared = Arc::clone(&self.shared);
        let index = self.index;
        let factor = viewport.scale * surface.pixel_ratio;
        let rotation = render_rotation(viewport.rotation);
        let (width, height, pixels) = tokio::task::spawn_blocking(move || {
            shared.with_page(index, |page| {
                let config = PdfRenderConfig::new()
                    .scale_page_by_factor(factor.max(0.01))
                    .rotate(rotation, true);
                let bitmap = page
                    .render_with_config(&config)
                    .with_context(|| format!("failed to render page {}", index + 1))?;
                let image = bitmap.as_image().to_rgba8();
                let (width, height) = image.dimensions();
                Ok((width, height, image.into_raw()))
            })
        })
        .await
        .map_err(ViewerError::backend)??;

        cancel.check()?;
        surface.blit_rgba(width, height, &pixels);
        Ok(())
    }

    async fn text_content(&self) -> ViewerResult<TextContent> {
        let height = self.size.height;
        let items = self.shared.with_page(self.index, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", self.index + 1))?;
            let items = text
                .segments()
                .iter()
                .map(|segment| TextItem {
                    text: segment.text(),
                    rect: to_top_left(&segment.bounds(), height),
                })
                .collect();
            Ok(items)
        })?;
        Ok(TextContent { items })
    }

    async fn annotations(&self) -> ViewerResult<Vec<Annotation>> {
        let height = self.size.height;
        let annotations = self.shared.with_page(self.index, |page| {
            let mut out = Vec::new();
            for annotation in page.annotations().iter() {
                let subtype = annotation.annotation_type();
                if subtype == PdfPageAnnotationType::Link {
                    continue;
                }
                let Ok(bounds) = annotation.bounds() else {
                    continue;
                };
                out.push(Annotation {
                    subtype: format!("{subtype:?}"),
                    rect: to_top_left(&bounds, height),
                    contents: annotation.contents(),
                    uri: None,
                });
            }

            for link in page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(?err, page = self.index + 1, "failed to resolve link rectangle");
                        continue;
                    }
                };
                out.push(Annotation {
                    subtype: "Link".to_string(),
                    rect: to_top_left(&rect, height),
                    contents: None,
                    uri: link_uri(&link),
                });
            }
            Ok(out)
        })?;
        Ok(annotations)
    }
}

fn link_uri(link: &PdfLink<'_>) -> Option<String> {
    let action = link.action()?;
    if action.action_type() != PdfActionType::Uri {
        return None;
    }
    action
        .as_uri_action()
        .and_then(|uri_action| uri_action.uri().ok())
        .filter(|uri| !uri.is_empty())
}

/// Pdfium rectangles have a bottom-left origin.
fn to_top_left(rect: &PdfRect, page_height: f32) -> Rect {
    let left = rect.left().value;
    let right = rect.right().value;
    let top = rect.top().value;
    let bottom = rect.bottom().value;
    Rect::new(left, page_height - top, (right - left).abs(), (top - bottom).abs())
}

fn render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Deg0 => PdfPageRenderRotation::None,
        Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
        Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
        Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
    }
}

fn map_load_error(err: PdfiumError, password_given: bool) -> ViewerError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            ViewerError::PasswordRequired {
                incorrect: password_given,
            }
        }
        other => ViewerError::Parse(other.to_string()),
    }
}

fn bind_pdfium_configured() -> Option<Pdfium> {
    let configured = worker::source().or_else(|| {
        std::env::var_os(LIBRARY_PATH_ENV)
            .filter(|path| !path.is_empty())
            .map(Into::into)
    })?;
    match bind_library(&configured) {
        Ok(pdfium) => Some(pdfium),
        Err(err) => {
            warn!(
                "failed to load Pdfium from configured path {}: {}",
                configured.display(),
                err
            );
            None
        }
    }
}

fn bind_library(path: &Path) -> Result<Pdfium> {
    let path = if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    };
    let bindings = Pdfium::bind_to_library(&path)
        .map_err(|err| anyhow!("{}: {}", path.display(), err))?;
    Ok(Pdfium::new(bindings))
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
