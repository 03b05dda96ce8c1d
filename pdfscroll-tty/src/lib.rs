use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use pdfscroll_core::{
    DrawingSurface, FindSession, Gesture, Modifiers, PageLayout, PageView, ScalePolicy, ScrollBand,
};
use png::{BitDepth, ColorType, Encoder};
use tracing::trace;

/// Composited RGBA image of the visible band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            pixels.extend_from_slice(&[color[0], color[1], color[2], 255]);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let px = self.pixels.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

pub const BACKGROUND: [u8; 3] = [48, 48, 48];
pub const PLACEHOLDER: [u8; 3] = [208, 208, 208];
const HIGHLIGHT: [u8; 3] = [255, 214, 0];
const HIGHLIGHT_ALPHA: f32 = 0.3;
const CURRENT_HIGHLIGHT_ALPHA: f32 = 0.6;

/// Composes every page intersecting `band` into one frame of
/// `band × pixel_ratio` pixels. Pages are centred horizontally; pages
/// without a completed render are drawn as flat placeholders.
pub fn compose_frame(
    band: ScrollBand,
    layout: &PageLayout,
    pages: &[PageView],
    find: Option<&FindSession>,
    pixel_ratio: f32,
) -> Frame {
    let ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
        pixel_ratio
    } else {
        1.0
    };
    let width = (band.width * ratio).round().max(1.0) as u32;
    let height = (band.height * ratio).round().max(1.0) as u32;
    let mut frame = Frame::filled(width, height, BACKGROUND);

    let origin_of = |index: usize| -> Option<(f32, f32)> {
        let span = layout.span(index)?;
        let view = pages.get(index)?;
        if span.bottom <= band.top() || span.top >= band.bottom() {
            return None;
        }
        let x = ((band.width - view.viewport.width) / 2.0).max(0.0);
        Some((x, span.top - band.scroll_top))
    };

    for (index, view) in pages.iter().enumerate() {
        let Some((x, y)) = origin_of(index) else {
            continue;
        };
        let origin = (x * ratio, y * ratio);
        let size = (view.viewport.width * ratio, view.viewport.height * ratio);
        match view.rendered.as_deref() {
            Some(rendered) => blit_scaled(&mut frame, origin, size, &rendered.surface),
            None => fill_rect(
                &mut frame,
                PixelRect::clip(origin, size, width, height),
                PLACEHOLDER,
                1.0,
            ),
        }
    }

    if let Some(session) = find {
        for (found, current) in session.highlights() {
            let Some(index) = found.page.checked_sub(1) else {
                continue;
            };
            let (Some((x, y)), Some(view)) = (origin_of(index), pages.get(index)) else {
                continue;
            };
            let rect = found.rect_in(&view.viewport);
            let origin = ((x + rect.x) * ratio, (y + rect.y) * ratio);
            let size = (rect.width * ratio, rect.height * ratio);
            let alpha = if current {
                CURRENT_HIGHLIGHT_ALPHA
            } else {
                HIGHLIGHT_ALPHA
            };
            fill_rect(&mut frame, PixelRect::clip(origin, size, width, height), HIGHLIGHT, alpha);
        }
    }

    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelRect {
    fn clip(origin: (f32, f32), size: (f32, f32), width: u32, height: u32) -> Self {
        let edge = |value: f32, limit: u32| value.round().clamp(0.0, limit as f32) as u32;
        Self {
            x0: edge(origin.0, width),
            y0: edge(origin.1, height),
            x1: edge(origin.0 + size.0, width),
            y1: edge(origin.1 + size.1, height),
        }
    }
}

/// Nearest-neighbour copy; a surface rendered for an older scale is
/// stretched until its replacement lands.
fn blit_scaled(frame: &mut Frame, origin: (f32, f32), size: (f32, f32), surface: &DrawingSurface) {
    let rect = PixelRect::clip(origin, size, frame.width, frame.height);
    if rect.x0 >= rect.x1
        || rect.y0 >= rect.y1
        || surface.pixel_width == 0
        || surface.pixel_height == 0
        || size.0 <= 0.0
        || size.1 <= 0.0
    {
        return;
    }
    let scale_x = surface.pixel_width as f32 / size.0;
    let scale_y = surface.pixel_height as f32 / size.1;
    let width = frame.width as usize;
    let src_stride = surface.pixel_width as usize * 4;

    for y in rect.y0..rect.y1 {
        let sy = (((y as f32 + 0.5 - origin.1) * scale_y) as u32).min(surface.pixel_height - 1);
        for x in rect.x0..rect.x1 {
            let sx = (((x as f32 + 0.5 - origin.0) * scale_x) as u32).min(surface.pixel_width - 1);
            let src = sy as usize * src_stride + sx as usize * 4;
            let Some(px) = surface.pixels.get(src..src + 3) else {
                continue;
            };
            let dst = (y as usize * width + x as usize) * 4;
            frame.pixels[dst..dst + 3].copy_from_slice(px);
            frame.pixels[dst + 3] = 255;
        }
    }
}

fn fill_rect(frame: &mut Frame, rect: PixelRect, color: [u8; 3], alpha: f32) {
    if rect.x0 >= rect.x1 || rect.y0 >= rect.y1 {
        return;
    }
    let width = frame.width as usize;
    let x1 = rect.x1.min(frame.width);
    let y1 = rect.y1.min(frame.height);

    for y in rect.y0..y1 {
        let row_start = (y as usize) * width * 4;
        for x in rect.x0..x1 {
            let idx = row_start + (x as usize) * 4;
            blend_pixel(&mut frame.pixels[idx..idx + 4], color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.iter_mut().zip(color) {
        *channel = ((*channel as f32 * inv) + (target as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    const CHUNK_SIZE: usize = 4096;

    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Transmits `frame` as PNG and places it at the cursor, replacing the
    /// previous placement.
    pub fn draw(&mut self, frame: &Frame, params: DrawParams) -> Result<()> {
        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, frame.width, frame.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&frame.pixels)?;
        writer.finish()?;

        let encoded = BASE64.encode(&buffer);
        trace!(
            width = frame.width,
            height = frame.height,
            payload = encoded.len(),
            "transmitting frame"
        );
        let mut chunks = encoded.as_bytes().chunks(Self::CHUNK_SIZE).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},c={},r={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    params.columns,
                    params.rows,
                    frame.width,
                    frame.height,
                    more
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", more)?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// The terminal presents everything buffered since `begin_sync_update`
    /// at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }

    /// Deletes every image this renderer placed.
    pub fn clear_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", self.image_id)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Scroll the container by `delta` units.
    Scroll { delta: f32 },
    NextPage { count: usize },
    PreviousPage { count: usize },
    GoToPage { page: usize },
    LastPage,
    Rotate { delta: i32 },
    SetScale(ScalePolicy),
    ZoomIn,
    ZoomOut,
    ToggleZoom,
    /// Raw zoom gesture, subject to the interaction guard.
    Gesture(Gesture),
    BeginFind,
    FindQueryChanged { query: String },
    FindSubmit { query: String },
    FindCancel,
    FindNext,
    FindPrevious,
    ClearFind,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Find,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    find_buffer: String,
}

impl EventMapper {
    pub const SCROLL_STEP: f32 = 40.0;
    const WHEEL_LINES: f32 = 3.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.find_buffer.clear();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Find => self.map_event_find(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => self.map_key_normal(code, modifiers),
            Event::Mouse(MouseEvent {
                kind, modifiers, ..
            }) => {
                let direction = match kind {
                    MouseEventKind::ScrollUp => -1.0,
                    MouseEventKind::ScrollDown => 1.0,
                    _ => return UiEvent::None,
                };
                let modifiers = to_modifiers(modifiers);
                if modifiers.zoom_modifier() {
                    UiEvent::Gesture(Gesture::Wheel {
                        delta_y: direction,
                        modifiers,
                    })
                } else {
                    UiEvent::Scroll {
                        delta: direction * Self::WHEEL_LINES * Self::SCROLL_STEP,
                    }
                }
            }
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char(c @ ('+' | '=' | '-' | '0')), modifiers)
                if modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER) =>
            {
                self.reset_count();
                UiEvent::Gesture(Gesture::Key {
                    key: c,
                    modifiers: to_modifiers(modifiers),
                })
            }
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Scroll {
                    delta: Self::SCROLL_STEP * count as f32,
                }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                let count = self.take_count();
                UiEvent::Scroll {
                    delta: -Self::SCROLL_STEP * count as f32,
                }
            }
            (KeyCode::Char('J'), _) | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiEvent::NextPage { count }
            }
            (KeyCode::Char('K'), _) | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::PreviousPage { count }
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.take_count();
                UiEvent::GoToPage { page }
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                self.reset_count();
                UiEvent::LastPage
            }
            (KeyCode::Char('r'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::Rotate { delta: 90 }
            }
            (KeyCode::Char('R'), _) => {
                self.reset_count();
                UiEvent::Rotate { delta: -90 }
            }
            (KeyCode::Char('w'), KeyModifiers::NONE) => self.scale(ScalePolicy::PageWidth),
            (KeyCode::Char('f'), KeyModifiers::NONE) => self.scale(ScalePolicy::PageFit),
            (KeyCode::Char('a'), KeyModifiers::NONE) => self.scale(ScalePolicy::Auto),
            (KeyCode::Char('+'), _) => {
                self.reset_count();
                UiEvent::ZoomIn
            }
            (KeyCode::Char('-'), _) => {
                self.reset_count();
                UiEvent::ZoomOut
            }
            (KeyCode::Char('z'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::ToggleZoom
            }
            (KeyCode::Char('/'), KeyModifiers::NONE) => {
                self.set_mode(InputMode::Find);
                UiEvent::BeginFind
            }
            (KeyCode::Char('n'), KeyModifiers::NONE) => {
                self.reset_count();
                UiEvent::FindNext
            }
            (KeyCode::Char('N'), modifiers)
                if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT =>
            {
                self.reset_count();
                UiEvent::FindPrevious
            }
            (KeyCode::Esc, _) => {
                self.reset_count();
                UiEvent::ClearFind
            }
            (KeyCode::Char('q'), _) => {
                self.reset_count();
                UiEvent::Quit
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                UiEvent::None
            }
        }
    }

    fn map_event_find(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => {
                    self.set_mode(InputMode::Normal);
                    UiEvent::FindCancel
                }
                (KeyCode::Enter, _) => {
                    let query = self.find_buffer.clone();
                    self.set_mode(InputMode::Normal);
                    UiEvent::FindSubmit { query }
                }
                (KeyCode::Backspace, _) => {
                    self.find_buffer.pop();
                    UiEvent::FindQueryChanged {
                        query: self.find_buffer.clone(),
                    }
                }
                (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                    self.find_buffer.push(c);
                    UiEvent::FindQueryChanged {
                        query: self.find_buffer.clone(),
                    }
                }
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn scale(&mut self, policy: ScalePolicy) -> UiEvent {
        self.reset_count();
        UiEvent::SetScale(policy)
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// Text to echo in the status line while a count or query is typed.
    pub fn pending_input(&self) -> Option<String> {
        if matches!(self.mode, InputMode::Find) {
            return Some(format!("/{}", self.find_buffer));
        }
        (!self.pending_digits.is_empty()).then(|| self.pending_digits.clone())
    }
}

fn to_modifiers(modifiers: KeyModifiers) -> Modifiers {
    Modifiers {
        ctrl: modifiers.contains(KeyModifiers::CONTROL),
        meta: modifiers.intersects(KeyModifiers::SUPER | KeyModifiers::META),
        alt: modifiers.contains(KeyModifiers::ALT),
        shift: modifiers.contains(KeyModifiers::SHIFT),
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crossterm::event::{KeyEventKind, KeyEventState};
    use pdfscroll_core::{
        FindOptions, PageSize, PageStatus, PageViewport, Rect, RenderedPage, Rotation, TextLayer,
        TextSpan,
    };

    fn page_view(number: usize, rendered_color: Option<[u8; 3]>) -> PageView {
        let viewport = PageViewport::new(PageSize::new(20.0, 10.0), 1.0, Rotation::Deg0);
        let rendered = rendered_color.map(|color| {
            let mut surface = DrawingSurface::for_viewport(&viewport, 1.0);
            for px in surface.pixels.chunks_mut(4) {
                px.copy_from_slice(&[color[0], color[1], color[2], 255]);
            }
            Arc::new(RenderedPage {
                surface,
                viewport,
                text_layer: None,
                annotations: Vec::new(),
            })
        });
        PageView {
            number,
            viewport,
            status: if rendered.is_some() {
                PageStatus::Rendered
            } else {
                PageStatus::Placeholder
            },
            rendered,
        }
    }

    fn two_pages() -> (PageLayout, Vec<PageView>) {
        let pages = vec![page_view(1, Some([255, 0, 0])), page_view(2, None)];
        let layout = PageLayout::new(pages.iter().map(|view| view.viewport.height), 2.0);
        (layout, pages)
    }

    #[test]
    fn compose_centres_pages_and_fills_placeholders() {
        let (layout, pages) = two_pages();
        let frame = compose_frame(ScrollBand::new(0.0, 40.0, 30.0), &layout, &pages, None, 1.0);
        assert_eq!((frame.width, frame.height), (40, 30));

        // left margin, page 1, gap, page 2, below the document
        assert_eq!(frame.pixel(5, 5), Some([48, 48, 48, 255]));
        assert_eq!(frame.pixel(15, 5), Some([255, 0, 0, 255]));
        assert_eq!(frame.pixel(15, 11), Some([48, 48, 48, 255]));
        assert_eq!(frame.pixel(15, 15), Some([208, 208, 208, 255]));
        assert_eq!(frame.pixel(15, 25), Some([48, 48, 48, 255]));
    }

    #[test]
    fn compose_offsets_by_scroll_and_pixel_ratio() {
        let (layout, pages) = two_pages();
        let frame = compose_frame(ScrollBand::new(8.0, 40.0, 10.0), &layout, &pages, None, 2.0);
        assert_eq!((frame.width, frame.height), (80, 20));
        // page 1 ends at y=10 in content space, 2 units into the band
        assert_eq!(frame.pixel(40, 1), Some([255, 0, 0, 255]));
        assert_eq!(frame.pixel(40, 5), Some([48, 48, 48, 255]));
        assert_eq!(frame.pixel(40, 10), Some([208, 208, 208, 255]));
    }

    #[test]
    fn stale_surfaces_are_stretched_to_the_current_viewport() {
        let (layout, mut pages) = two_pages();
        let zoomed = PageViewport::new(PageSize::new(20.0, 10.0), 2.0, Rotation::Deg0);
        pages[0].viewport = zoomed;
        let layout = PageLayout::new(pages.iter().map(|view| view.viewport.height), layout.gap());
        let frame = compose_frame(ScrollBand::new(0.0, 40.0, 30.0), &layout, &pages, None, 1.0);
        assert_eq!(frame.pixel(2, 18), Some([255, 0, 0, 255]));
        assert_eq!(frame.pixel(38, 18), Some([255, 0, 0, 255]));
    }

    #[test]
    fn find_highlights_blend_with_current_match_stronger() {
        let (layout, mut pages) = two_pages();
        let layer = TextLayer {
            spans: vec![TextSpan {
                text: "ab ab".to_string(),
                rect: Rect::new(0.0, 0.0, 10.0, 4.0),
                page_rect: Rect::new(0.0, 0.0, 10.0, 4.0),
            }],
        };
        pages[0] = page_view(1, Some([0, 0, 0]));
        let session = FindSession::search("ab", FindOptions::default(), [(1, &layer)]);
        assert_eq!(session.matches().len(), 2);

        let frame = compose_frame(
            ScrollBand::new(0.0, 40.0, 30.0),
            &layout,
            &pages,
            Some(&session),
            1.0,
        );
        let current = frame.pixel(11, 1).unwrap();
        let other = frame.pixel(17, 1).unwrap();
        let untouched = frame.pixel(11, 8).unwrap();
        assert_eq!(untouched, [0, 0, 0, 255]);
        assert!(current[0] > other[0]);
        assert!(other[0] > 0);
    }

    #[test]
    fn find_highlights_follow_zoomed_pages() {
        let (_, mut pages) = two_pages();
        let layer = TextLayer {
            spans: vec![TextSpan {
                text: "ab ab".to_string(),
                rect: Rect::new(0.0, 0.0, 10.0, 4.0),
                page_rect: Rect::new(0.0, 0.0, 10.0, 4.0),
            }],
        };
        let session = FindSession::search("ab", FindOptions::default(), [(1, &layer)]);
        pages[0] = page_view(1, Some([0, 0, 0]));
        pages[0].viewport = PageViewport::new(PageSize::new(20.0, 10.0), 2.0, Rotation::Deg0);
        let layout = PageLayout::new(pages.iter().map(|view| view.viewport.height), 2.0);

        let frame = compose_frame(
            ScrollBand::new(0.0, 40.0, 30.0),
            &layout,
            &pages,
            Some(&session),
            1.0,
        );
        // second match spans x 12..20, y 0..8 once the page is at 2x
        assert!(frame.pixel(14, 6).unwrap()[0] > 0);
        assert_eq!(frame.pixel(30, 6), Some([0, 0, 0, 255]));
        assert_eq!(frame.pixel(14, 9), Some([0, 0, 0, 255]));
    }

    #[test]
    fn blend_pixel_mixes_channels() {
        let mut pixel = [0, 100, 200, 255];
        blend_pixel(&mut pixel, [100, 100, 100], 0.5);
        assert_eq!(pixel[..3], [50, 100, 150]);
    }

    #[test]
    fn kitty_draw_emits_protocol() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let frame = Frame::filled(1, 1, [255, 0, 0]);

        renderer.draw(&frame, DrawParams::clamped(10, 5)).unwrap();
        let output = renderer.writer;
        assert_eq!(output[0], 0x1b);
        assert_eq!(output[1], b'_');
        assert_eq!(output[2], b'G');
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("s=1,v=1"));
        assert!(text.contains("m=0"));
    }

    #[test]
    fn kitty_draw_splits_large_payloads() {
        let mut renderer = KittyRenderer::new(Vec::new());
        let mut frame = Frame::filled(64, 64, [0, 0, 0]);
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        for byte in frame.pixels.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *byte = state as u8;
        }

        renderer.draw(&frame, DrawParams::clamped(0, 0)).unwrap();
        let text = String::from_utf8(renderer.writer).unwrap();
        let escapes = text.matches("\u{1b}_G").count();
        assert!(escapes > 1, "expected chunked transfer, got {escapes} escape(s)");
        assert!(text.contains("c=1,r=1"));
        assert!(text.contains("\u{1b}_Gm=0,q=2;"));
        for payload in text.split("\u{1b}\\").filter_map(|chunk| chunk.split_once(';')) {
            assert!(payload.1.len() <= 4096);
        }
    }

    #[test]
    fn sync_update_brackets() {
        let mut renderer = KittyRenderer::new(Vec::new());
        renderer.begin_sync_update().unwrap();
        renderer.end_sync_update().unwrap();
        assert_eq!(renderer.writer, b"\x1b[?2026h\x1b[?2026l");
    }

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn wheel(kind: MouseEventKind, modifiers: KeyModifiers) -> Event {
        Event::Mouse(MouseEvent {
            kind,
            column: 0,
            row: 0,
            modifiers,
        })
    }

    #[test]
    fn count_prefix_selects_page_for_g() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('g'))),
            UiEvent::GoToPage { page: 12 }
        );
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('g'))),
            UiEvent::GoToPage { page: 1 }
        );
    }

    #[test]
    fn count_prefix_multiplies_scroll_and_page_steps() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('3')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Scroll {
                delta: 3.0 * EventMapper::SCROLL_STEP
            }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            UiEvent::Scroll {
                delta: -EventMapper::SCROLL_STEP
            }
        );
        mapper.map_event(key_event(KeyCode::Char('2')));
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('J'), KeyModifiers::SHIFT)),
            UiEvent::NextPage { count: 2 }
        );
    }

    #[test]
    fn count_prefix_dropped_by_other_commands() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('r'))),
            UiEvent::Rotate { delta: 90 }
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('K'), KeyModifiers::SHIFT)),
            UiEvent::PreviousPage { count: 1 }
        );
    }

    #[test]
    fn policy_and_rotation_keys() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('w'))),
            UiEvent::SetScale(ScalePolicy::PageWidth)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('f'))),
            UiEvent::SetScale(ScalePolicy::PageFit)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('a'))),
            UiEvent::SetScale(ScalePolicy::Auto)
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('R'), KeyModifiers::SHIFT)),
            UiEvent::Rotate { delta: -90 }
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('G'), KeyModifiers::SHIFT)),
            UiEvent::LastPage
        );
    }

    #[test]
    fn ctrl_zoom_keys_become_gestures() {
        let mut mapper = EventMapper::new();
        match mapper.map_event(key_event_with_modifiers(KeyCode::Char('='), KeyModifiers::CONTROL)) {
            UiEvent::Gesture(gesture) => {
                assert!(gesture.is_zoom());
                assert_eq!(
                    gesture,
                    Gesture::Key {
                        key: '=',
                        modifiers: Modifiers::CTRL
                    }
                );
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('0'), KeyModifiers::CONTROL)),
            UiEvent::Gesture(Gesture::Key { key: '0', .. })
        ));
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('+'))), UiEvent::ZoomIn);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('-'))), UiEvent::ZoomOut);
    }

    #[test]
    fn wheel_scrolls_or_zooms_with_ctrl() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(wheel(MouseEventKind::ScrollDown, KeyModifiers::NONE)),
            UiEvent::Scroll {
                delta: 3.0 * EventMapper::SCROLL_STEP
            }
        );
        assert_eq!(
            mapper.map_event(wheel(MouseEventKind::ScrollUp, KeyModifiers::CONTROL)),
            UiEvent::Gesture(Gesture::Wheel {
                delta_y: -1.0,
                modifiers: Modifiers::CTRL
            })
        );
    }

    #[test]
    fn slash_enters_find_mode_and_collects_input() {
        let mut mapper = EventMapper::new();

        assert_eq!(mapper.map_event(key_event(KeyCode::Char('/'))), UiEvent::BeginFind);
        assert_eq!(mapper.mode(), InputMode::Find);
        assert_eq!(mapper.pending_input().as_deref(), Some("/"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('f'))),
            UiEvent::FindQueryChanged {
                query: "f".to_string()
            }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Backspace)),
            UiEvent::FindQueryChanged {
                query: String::new()
            }
        );
        mapper.map_event(key_event(KeyCode::Char('g')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::FindSubmit {
                query: "g".to_string()
            }
        );
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn find_navigation_and_clearing() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('n'))), UiEvent::FindNext);
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('N'), KeyModifiers::SHIFT)),
            UiEvent::FindPrevious
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::ClearFind);

        mapper.map_event(key_event(KeyCode::Char('/')));
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::FindCancel);
        assert_eq!(mapper.mode(), InputMode::Normal);
    }
}
