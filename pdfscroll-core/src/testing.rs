//! In-memory engine used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{
    Annotation, CancelToken, DocumentBackend, DocumentProvider, DrawingSurface, LoadOptions,
    PageHandle, TextContent, TextItem,
};
use crate::error::{Result, ViewerError};
use crate::geometry::{PageSize, PageViewport, Rect};
use crate::metadata::DocumentMetadata;
use crate::source::SourceDescriptor;

pub const PAGE_WIDTH: f32 = 600.0;
pub const PAGE_HEIGHT: f32 = 800.0;

#[derive(Debug, Clone)]
pub struct FakeDocument {
    pub sizes: Vec<PageSize>,
    pub texts: HashMap<usize, Vec<String>>,
    pub password: Option<String>,
    pub failing_pages: HashSet<usize>,
    pub metadata: DocumentMetadata,
}

impl FakeDocument {
    pub fn uniform(pages: usize) -> Self {
        Self {
            sizes: vec![PageSize::new(PAGE_WIDTH, PAGE_HEIGHT); pages],
            texts: HashMap::new(),
            password: None,
            failing_pages: HashSet::new(),
            metadata: DocumentMetadata {
                title: Some(format!("{pages} pages")),
                ..DocumentMetadata::default()
            },
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    /// Each string becomes one text item stacked down the page.
    pub fn with_text(mut self, page: usize, lines: &[&str]) -> Self {
        self.texts
            .insert(page, lines.iter().map(|line| line.to_string()).collect());
        self
    }

    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_pages.insert(page);
        self
    }
}

#[derive(Default)]
pub struct FakeProvider {
    documents: Mutex<HashMap<String, FakeDocument>>,
    opens: AtomicUsize,
    destroyed: Arc<Mutex<Vec<String>>>,
    renders: Arc<Mutex<Vec<(usize, f32)>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, document: FakeDocument) {
        self.documents.lock().insert(name.to_string(), document);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn destroyed_sources(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }

    pub fn destroy_count(&self, name: &str) -> usize {
        self.destroyed
            .lock()
            .iter()
            .filter(|destroyed| destroyed.as_str() == name)
            .count()
    }

    /// `(page, scale)` of every completed rasterization.
    pub fn renders(&self) -> Vec<(usize, f32)> {
        self.renders.lock().clone()
    }
}

fn source_name(source: &SourceDescriptor) -> String {
    match source {
        SourceDescriptor::Url(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_owned))
            .unwrap_or_default(),
        SourceDescriptor::Base64(_) => "embedded".to_string(),
        SourceDescriptor::Binary(_) => "bytes".to_string(),
    }
}

#[async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(
        &self,
        source: &SourceDescriptor,
        options: &LoadOptions,
        _cancel: &CancelToken,
    ) -> Result<Arc<dyn DocumentBackend>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let name = source_name(source);
        let document = self
            .documents
            .lock()
            .get(&name)
            .cloned()
            .ok_or_else(|| ViewerError::Transport(format!("{name}: 404 Not Found")))?;

        if let Some(expected) = document.password.as_deref() {
            match options.password.as_deref() {
                None => return Err(ViewerError::PasswordRequired { incorrect: false }),
                Some(given) if given != expected => {
                    return Err(ViewerError::PasswordRequired { incorrect: true })
                }
                Some(_) => {}
            }
        }

        Ok(Arc::new(FakeBackend {
            name,
            document,
            destroyed: AtomicBool::new(false),
            destroyed_log: Arc::clone(&self.destroyed),
            renders: Arc::clone(&self.renders),
        }))
    }
}

struct FakeBackend {
    name: String,
    document: FakeDocument,
    destroyed: AtomicBool,
    destroyed_log: Arc<Mutex<Vec<String>>>,
    renders: Arc<Mutex<Vec<(usize, f32)>>>,
}

#[async_trait]
impl DocumentBackend for FakeBackend {
    fn page_count(&self) -> usize {
        self.document.sizes.len()
    }

    fn fingerprints(&self) -> Vec<String> {
        vec![format!("fp-{}", self.name)]
    }

    async fn metadata(&self) -> Result<DocumentMetadata> {
        Ok(self.document.metadata.clone())
    }

    async fn page(&self, number: usize) -> Result<Arc<dyn PageHandle>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ViewerError::backend("document used after destroy"));
        }
        let size = *self
            .document
            .sizes
            .get(number.wrapping_sub(1))
            .ok_or(ViewerError::PageOutOfRange {
                page: number,
                page_count: self.page_count(),
            })?;
        Ok(Arc::new(FakePage {
            number,
            size,
            lines: self.document.texts.get(&number).cloned().unwrap_or_default(),
            failing: self.document.failing_pages.contains(&number),
            renders: Arc::clone(&self.renders),
        }))
    }

    fn destroy(&self) -> Result<()> {
        assert!(
            !self.destroyed.swap(true, Ordering::SeqCst),
            "document {} destroyed twice",
            self.name
        );
        self.destroyed_log.lock().push(self.name.clone());
        Ok(())
    }
}

struct FakePage {
    number: usize,
    size: PageSize,
    lines: Vec<String>,
    failing: bool,
    renders: Arc<Mutex<Vec<(usize, f32)>>>,
}

#[async_trait]
impl PageHandle for FakePage {
    fn number(&self) -> usize {
        self.number
    }

    fn size(&self) -> PageSize {
        self.size
    }

    async fn render(
        &self,
        surface: &mut DrawingSurface,
        viewport: &PageViewport,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        tokio::task::yield_now().await;
        cancel.check()?;
        if self.failing {
            return Err(ViewerError::backend("corrupt content stream"));
        }
        for pixel in surface.pixels.chunks_exact_mut(4) {
            pixel[0] = self.number as u8;
        }
        self.renders.lock().push((self.number, viewport.scale));
        Ok(())
    }

    async fn text_content(&self) -> Result<TextContent> {
        let items = self
            .lines
            .iter()
            .enumerate()
            .map(|(row, line)| TextItem {
                text: line.clone(),
                rect: Rect::new(50.0, 50.0 + row as f32 * 20.0, line.chars().count() as f32 * 10.0, 12.0),
            })
            .collect();
        Ok(TextContent { items })
    }

    async fn annotations(&self) -> Result<Vec<Annotation>> {
        Ok(vec![Annotation {
            subtype: "Link".to_string(),
            rect: Rect::new(0.0, 0.0, 100.0, 20.0),
            contents: None,
            uri: Some(format!("https://example.com/{}", self.number)),
        }])
    }
}
