use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pdfscroll_core::{
    worker, DocumentProvider, FileViewStateStore, FindOptions, GestureDisposition, LoadOptions,
    LoadOutcome, ScaleValue, SourceResolver, ViewStateStore, Viewer, ViewerConfig, ViewerEvent,
};
use pdfscroll_render::PdfiumProvider;
use pdfscroll_tty::{
    compose_frame, write_status_line, DrawParams, EventMapper, KittyRenderer, UiEvent,
};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const PASSWORD_ATTEMPTS: usize = 3;
const IDLE_POLL: Duration = Duration::from_millis(50);
const FALLBACK_CELL: (f32, f32) = (8.0, 16.0);

#[derive(Debug, Parser)]
#[command(
    name = "pdfscroll",
    version,
    about = "Continuous-scroll PDF viewer for kitty-compatible terminals"
)]
struct Args {
    /// File path, URL, or `data:application/pdf;base64,` payload
    source: String,

    /// Page to open on (1-based); overrides the saved reading position
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Initial scale: a number or page-width, page-fit, page-actual, auto
    #[arg(short = 's', long = "scale")]
    scale: Option<ScaleValue>,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    /// Extra HTTP header for remote documents, as `Name: value`
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Disable zooming, including ctrl+wheel and ctrl+key gestures
    #[arg(long)]
    no_zoom: bool,

    /// Config file to use instead of the default location
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Pdfium library file or directory containing it
    #[arg(long = "pdfium")]
    pdfium: Option<PathBuf>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), event::EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, event::DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfscroll", "pdfscroll")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let mut config = ViewerConfig::load(&config_path)?;
    if let Some(scale) = args.scale {
        config.initial_scale = scale;
    }
    if args.no_zoom {
        config.zoom_enabled = false;
    }

    if let Some(path) = args.pdfium.as_deref() {
        if !worker::configure(path) {
            warn!(path = %path.display(), "pdfium library already configured");
        }
    }

    let provider: Arc<dyn DocumentProvider> = Arc::new(PdfiumProvider::new()?);
    let resolver = SourceResolver::from_current_dir()?;
    let viewer = Viewer::new(provider, config, resolver);

    let (columns, rows, band_width, band_height) = terminal_geometry(viewer.config())?;
    viewer.resize(band_width, band_height);

    let options = LoadOptions {
        http_headers: args.headers.iter().cloned().collect::<BTreeMap<_, _>>(),
        password: args.password.clone(),
        worker_src: args.pdfium.clone(),
        ..LoadOptions::default()
    };
    open_document(&viewer, &args.source, options).await?;

    let store = FileViewStateStore::new(project_dirs.data_local_dir().join("state"))?;
    let fingerprint = viewer
        .document_info()
        .and_then(|info| info.primary_fingerprint().map(str::to_owned));
    if let Some(fingerprint) = fingerprint.as_deref() {
        match store.load(fingerprint) {
            Ok(Some(saved)) => {
                debug!(page = saved.page, "restoring reading position");
                viewer.restore(&saved);
            }
            Ok(None) => {}
            Err(err) => warn!("failed to read saved view state: {err:#}"),
        }
    }
    if let Some(page) = args.page {
        viewer.go_to_page(page);
    }

    let result = run(&viewer, (columns, rows)).await;

    if let Some(fingerprint) = fingerprint.as_deref() {
        if let Err(err) = store.save(fingerprint, &viewer.persisted_state()) {
            warn!("failed to save view state: {err:#}");
        }
    }
    viewer.teardown();
    result
}

/// Loads `source`, prompting for a password while the document asks for one.
async fn open_document(viewer: &Viewer, source: &str, options: LoadOptions) -> Result<()> {
    let mut outcome = viewer.open(source, options).await?;
    let mut attempts = 0;
    loop {
        match outcome {
            LoadOutcome::Ready(_) => {
                if let Some(info) = viewer.document_info() {
                    info!(pages = info.num_pages, title = ?info.metadata.title, "opened {source}");
                }
                return Ok(());
            }
            LoadOutcome::Failed(err) if err.is_password_required() => {
                if attempts == PASSWORD_ATTEMPTS {
                    bail!("{source}: {err}");
                }
                attempts += 1;
                let password = prompt_password(&err.to_string())?;
                let task = viewer.reload_with_password(password)?;
                outcome = viewer.settle(task).await;
            }
            LoadOutcome::Failed(err) => {
                return Err(anyhow!(err)).with_context(|| format!("failed to open {source}"))
            }
            LoadOutcome::Stale => bail!("loading {source} was superseded"),
        }
    }
}

fn prompt_password(reason: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{reason}. Password: ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn run(viewer: &Viewer, size: (u32, u32)) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut event_mapper = EventMapper::new();
    let mut status = String::new();
    let mut size = size;
    let mut dirty = true;
    renderer.clear_all()?;

    loop {
        let now = Instant::now();
        for event in viewer.events().drain() {
            match event {
                ViewerEvent::ScrollRequested(request) => {
                    viewer.on_scroll(request.offset, now);
                    dirty = true;
                }
                ViewerEvent::LoadFailed(err) => {
                    status = err.to_string();
                    dirty = true;
                }
                ViewerEvent::FindUpdated { matches, .. } if matches == 0 => {
                    status = "pattern not found".to_string();
                    dirty = true;
                }
                ViewerEvent::PageChanged { .. }
                | ViewerEvent::ScaleChanged { .. }
                | ViewerEvent::RotationChanged { .. }
                | ViewerEvent::FindUpdated { .. }
                | ViewerEvent::RedrawNeeded => dirty = true,
                _ => {}
            }
        }

        let report = viewer.render_pending().await;
        if report.rendered + report.failed > 0 {
            dirty = true;
        }
        if viewer.tick(now).is_some() {
            dirty = true;
        }

        if dirty {
            redraw(&mut renderer, viewer, size, &status, event_mapper.pending_input())?;
            dirty = false;
        }

        let timeout = viewer
            .next_tick()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_POLL)
            .min(IDLE_POLL);
        if !event::poll(timeout)? {
            continue;
        }

        let raw = event::read()?;
        if let event::Event::Resize(..) = raw {
            let (columns, rows, width, height) = terminal_geometry(viewer.config())?;
            size = (columns, rows);
            viewer.resize(width, height);
            renderer.clear_all()?;
            dirty = true;
            continue;
        }

        status.clear();
        match handle_event(viewer, event_mapper.map_event(raw)).await? {
            LoopAction::Continue => {}
            LoopAction::ContinueRedraw => dirty = true,
            LoopAction::Quit => break,
        }
    }

    renderer.clear_images()?;
    renderer.clear_all()?;
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

async fn handle_event(viewer: &Viewer, event: UiEvent) -> Result<LoopAction> {
    let now = Instant::now();
    match event {
        UiEvent::Scroll { delta } => {
            let layout = viewer.layout();
            let band = viewer.band();
            let top = (band.scroll_top + delta).clamp(0.0, layout.max_scroll_top(band.height));
            viewer.on_scroll(top, now);
        }
        UiEvent::NextPage { count } => {
            viewer.go_to_page(viewer.current_page().saturating_add(count));
        }
        UiEvent::PreviousPage { count } => {
            viewer.go_to_page(viewer.current_page().saturating_sub(count).max(1));
        }
        UiEvent::GoToPage { page } => {
            viewer.go_to_page(page);
        }
        UiEvent::LastPage => {
            viewer.go_to_page(viewer.total_pages());
        }
        UiEvent::Rotate { delta } => {
            viewer.rotate(delta)?;
        }
        UiEvent::SetScale(policy) => {
            viewer.set_scale(policy).await;
        }
        UiEvent::ZoomIn => {
            viewer.zoom_in();
        }
        UiEvent::ZoomOut => {
            viewer.zoom_out();
        }
        UiEvent::ToggleZoom => {
            viewer.set_zoom_enabled(!viewer.zoom_enabled());
        }
        UiEvent::Gesture(gesture) => {
            if viewer.handle_gesture(&gesture) == GestureDisposition::Suppress {
                return Ok(LoopAction::Continue);
            }
        }
        UiEvent::BeginFind | UiEvent::FindQueryChanged { .. } | UiEvent::FindCancel => {}
        UiEvent::FindSubmit { query } => {
            viewer.find(&query, FindOptions::default());
        }
        UiEvent::FindNext => {
            viewer.find_next();
        }
        UiEvent::FindPrevious => {
            viewer.find_previous();
        }
        UiEvent::ClearFind => viewer.clear_find(),
        UiEvent::Quit => return Ok(LoopAction::Quit),
        UiEvent::None => return Ok(LoopAction::Continue),
    }
    Ok(LoopAction::ContinueRedraw)
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewer: &Viewer,
    (columns, rows): (u32, u32),
    status: &str,
    pending_input: Option<String>,
) -> Result<()> {
    let image_rows = rows.saturating_sub(1).max(1);
    let frame = compose_frame(
        viewer.band(),
        &viewer.layout(),
        &viewer.page_views(),
        viewer.find_session().as_ref(),
        viewer.config().device_pixel_ratio,
    );

    renderer.begin_sync_update()?;
    {
        let mut writer = renderer.writer();
        crossterm::execute!(&mut writer, cursor::MoveTo(0, 0))?;
    }
    renderer.draw(&frame, DrawParams::clamped(columns, image_rows))?;

    let line = status_line(viewer, status, pending_input.as_deref());
    {
        let mut writer = renderer.writer();
        crossterm::execute!(
            &mut writer,
            cursor::MoveTo(0, image_rows.min(u32::from(u16::MAX)) as u16),
            Clear(ClearType::CurrentLine)
        )?;
        let width = columns as usize;
        let line: String = line.chars().take(width).collect();
        write_status_line(&mut writer, &line)?;
    }
    renderer.end_sync_update()?;
    Ok(())
}

fn status_line(viewer: &Viewer, message: &str, pending_input: Option<&str>) -> String {
    let state = viewer.viewport_state();
    let zoom_percent = state.current_scale * 100.0;
    let mut line = format!(
        "page {}/{} | {:.0}% | {}°",
        state.current_page,
        viewer.total_pages(),
        zoom_percent,
        state.current_rotation.degrees()
    );
    if let Some(title) = viewer.document_info().and_then(|info| info.metadata.title) {
        line = format!("{title} | {line}");
    }
    if !viewer.zoom_enabled() {
        line.push_str(" | zoom locked");
    }
    if let Some(session) = viewer.find_session() {
        let position = session.current_index().map(|index| index + 1).unwrap_or(0);
        line.push_str(&format!(
            " | /{} {}/{}",
            session.query(),
            position,
            session.matches().len()
        ));
    }
    if !message.is_empty() {
        line.push_str(" | ");
        line.push_str(message);
    }
    if let Some(pending) = pending_input.filter(|pending| !pending.is_empty()) {
        line.push_str(" | ");
        line.push_str(pending);
    }
    line
}

/// Terminal size in cells plus the band the image area covers, in
/// layout units.
fn terminal_geometry(config: &ViewerConfig) -> Result<(u32, u32, f32, f32)> {
    let window = terminal::window_size()?;
    let columns = u32::from(window.columns).max(1);
    let rows = u32::from(window.rows).max(1);
    let image_rows = rows.saturating_sub(1).max(1);

    let (cell_width, cell_height) = if window.width > 0 && window.height > 0 {
        (
            f32::from(window.width) / columns as f32,
            f32::from(window.height) / rows as f32,
        )
    } else {
        FALLBACK_CELL
    };
    let ratio = config.device_pixel_ratio;
    Ok((
        columns,
        rows,
        columns as f32 * cell_width / ratio,
        image_rows as f32 * cell_height / ratio,
    ))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfscroll.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
