use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::cursor;
use crossterm::event;
use crossterm::style::{Attribute, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use readmark_core::{
    calculator, document_id_for_path, FileBlobStore, ProgressRecord, ProgressSink,
    ProgressStore, ReadingTracker, ReadmarkConfig, RestorationCoordinator, RestorationHandle,
    RestorationTarget,
};
use readmark_tty::{
    format_progress, write_status_line, DrawParams, EventMapper, TextRenderer, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod capture;
mod document;
mod viewer;

use capture::ScrollCapture;
use document::TextDocument;
use viewer::Viewer;

#[derive(Debug, Parser)]
#[command(
    name = "readmark",
    version,
    about = "Terminal text reader that remembers where you left off"
)]
struct Args {
    /// Alternate configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Debug, Subcommand)]
enum CommandKind {
    /// Open a text file, resuming at the saved position
    Read {
        file: PathBuf,
        /// Open at this chapter (0-based) instead of the saved position
        #[arg(short = 'c', long = "chapter")]
        chapter: Option<usize>,
    },
    /// Show the saved progress for a file
    Status { file: PathBuf },
    /// List every saved record, most recently read first
    List,
    /// Delete the saved progress for a file
    Forget { file: PathBuf },
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "readmark", "readmark")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let interactive = matches!(args.command, CommandKind::Read { .. });
    let _log_guard = init_logging(&project_dirs, !interactive)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = load_config(&config_path);

    let blob_path = project_dirs.data_local_dir().join("progress.json");
    let store = Arc::new(ProgressStore::new(Arc::new(FileBlobStore::new(blob_path)?)));

    match args.command {
        CommandKind::Read { file, chapter } => read(&file, chapter, store, config).await,
        CommandKind::Status { file } => print_status(&store, &file),
        CommandKind::List => print_list(&store),
        CommandKind::Forget { file } => forget(&store, &file),
    }
}

fn load_config(path: &Path) -> ReadmarkConfig {
    match ReadmarkConfig::load(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(?path, error = %err, "ignoring invalid configuration");
            ReadmarkConfig::default()
        }
    }
}

async fn read(
    path: &Path,
    chapter: Option<usize>,
    store: Arc<ProgressStore>,
    config: ReadmarkConfig,
) -> Result<()> {
    let document =
        TextDocument::load(path).with_context(|| format!("failed to open {:?}", path))?;
    let document_id = document_id_for_path(path);
    let saved = store.get(&document_id);
    info!(
        %document_id,
        chapters = document.chapter_count(),
        resumed = saved.is_some(),
        "opening document"
    );

    let sink: Arc<dyn ProgressSink> = store.clone();
    let mut tracker = ReadingTracker::open(
        document_id.as_str(),
        document.chapter_count(),
        saved.as_ref(),
        sink,
        config.autosave.clone(),
    );

    let (_, rows) = terminal::size()?;
    let viewer = Arc::new(Viewer::new(
        document.line_counts(),
        chapter.unwrap_or(0),
        usize::from(rows.saturating_sub(1)),
    ));

    // An explicit chapter takes precedence over the saved position.
    let mut restoration = match (chapter, saved) {
        (None, Some(record)) => {
            let target: Arc<dyn RestorationTarget> = viewer.clone();
            Some(RestorationCoordinator::new(config.restore.clone()).spawn(record, target))
        }
        (Some(_), _) => {
            tracker.change_chapter(viewer.position().chapter);
            None
        }
        (None, None) => None,
    };

    let result = run_viewer(&document, &viewer, &mut tracker, &config, &mut restoration).await;

    if let Some(restoration) = restoration {
        restoration.cancel();
    }
    let outcome = tracker.close().await;
    info!(%document_id, ?outcome, "document closed");
    result
}

const IDLE_POLL: Duration = Duration::from_millis(100);

async fn run_viewer(
    document: &TextDocument,
    viewer: &Viewer,
    tracker: &mut ReadingTracker,
    config: &ReadmarkConfig,
    restoration: &mut Option<RestorationHandle>,
) -> Result<()> {
    let _raw_mode = RawModeGuard::new()?;
    let mut renderer = TextRenderer::new(io::stdout());
    let mut event_mapper = EventMapper::new();
    let mut capture = ScrollCapture::new(config.capture.coalesce_window, viewer.position());

    renderer.clear_all()?;
    loop {
        let now = Instant::now();
        let notification = viewer.notification(now);
        if viewer.take_dirty() {
            let pending = event_mapper.pending_input();
            redraw(
                &mut renderer,
                document,
                viewer,
                notification.as_deref(),
                pending.as_deref(),
            )?;
        }

        let restored = restoration.as_ref().map_or(false, RestorationHandle::is_finished);
        capture.observe(viewer.position(), now, restoration.is_some(), tracker);
        if restored {
            *restoration = None;
        }

        let timeout = capture
            .next_deadline(now)
            .map_or(IDLE_POLL, |wait| wait.min(IDLE_POLL));
        if event::poll(timeout)? {
            match event_mapper.map_event(event::read()?) {
                UiEvent::Command(command) => {
                    // User input ends restoration.
                    if let Some(handle) = restoration.take() {
                        handle.cancel();
                    }
                    viewer.apply(command);
                    viewer.mark_dirty();
                }
                UiEvent::Resize | UiEvent::None => viewer.mark_dirty(),
                UiEvent::Quit => break,
            }
        }
        tokio::task::yield_now().await;
    }

    capture.finish(tracker);
    let mut writer = renderer.writer();
    crossterm::execute!(&mut writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

fn redraw(
    renderer: &mut TextRenderer<io::Stdout>,
    document: &TextDocument,
    viewer: &Viewer,
    notification: Option<&str>,
    pending_input: Option<&str>,
) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    let text_rows = rows.saturating_sub(1).max(1);
    viewer.set_viewport_rows(usize::from(text_rows));
    let position = viewer.position();
    let Some(chapter) = document.chapter(position.chapter) else {
        return Ok(());
    };

    renderer.begin_sync_update()?;
    renderer.draw(
        &chapter.lines,
        DrawParams {
            columns,
            rows: text_rows,
            first_line: position.top_line,
        },
    )?;
    let status = match notification {
        Some(text) => text.to_owned(),
        None => {
            let fraction = calculator::calculate(
                position.chapter,
                document.chapter_count(),
                position.scroll_fraction,
            );
            format!(
                "{} | {}",
                chapter.title,
                format_progress(fraction, position.chapter, document.chapter_count())
            )
        }
    };
    let status = combine_status(status, pending_input);
    draw_status_line(renderer, text_rows, columns, &status)?;
    renderer.end_sync_update()?;
    viewer.mark_laid_out(position.chapter);
    Ok(())
}

fn combine_status(mut base: String, pending_input: Option<&str>) -> String {
    if let Some(pending) = pending_input.filter(|s| !s.is_empty()) {
        base.push_str(" | ");
        base.push_str(pending);
    }
    base
}

fn draw_status_line(
    renderer: &mut TextRenderer<io::Stdout>,
    row: u16,
    columns: u16,
    status: &str,
) -> Result<()> {
    let visible: String = status.chars().take(usize::from(columns.max(1))).collect();
    let mut writer = renderer.writer();
    crossterm::queue!(
        &mut writer,
        cursor::MoveTo(0, row),
        Clear(ClearType::CurrentLine),
        SetAttribute(Attribute::Reverse)
    )?;
    write_status_line(&mut writer, &visible)?;
    crossterm::execute!(&mut writer, SetAttribute(Attribute::Reset))?;
    Ok(())
}

fn print_status(store: &ProgressStore, path: &Path) -> Result<()> {
    let document_id = document_id_for_path(path);
    match store.get(&document_id) {
        Some(record) => println!("{}  {}", path.display(), describe(&record)),
        None => println!("{}  no saved progress", path.display()),
    }
    Ok(())
}

fn print_list(store: &ProgressStore) -> Result<()> {
    let records = store.records();
    if records.is_empty() {
        println!("no saved progress");
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    for record in records {
        writeln!(stdout, "{}  {}", record.document_id, describe(&record))?;
    }
    Ok(())
}

fn forget(store: &ProgressStore, path: &Path) -> Result<()> {
    let document_id = document_id_for_path(path);
    if store.get(&document_id).is_none() {
        println!("{}  no saved progress", path.display());
        return Ok(());
    }
    if !store.remove(&document_id) {
        bail!("failed to remove saved progress for {:?}", path);
    }
    info!(%document_id, "progress forgotten");
    println!("{}  progress removed", path.display());
    Ok(())
}

fn describe(record: &ProgressRecord) -> String {
    format!(
        "{}%  chapter {}/{}  line {}  read {}  last opened {}{}",
        record.percent(),
        record.chapter_index + 1,
        record.total_chapters.max(1),
        record.scroll_offset.round() as u64,
        format_duration(record.time_spent_seconds),
        record.last_read_at.format("%Y-%m-%d %H:%M"),
        if record.completed { "  completed" } else { "" }
    )
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "readmark.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // The reader owns the terminal, so console output is only wired up for one-shot commands.
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
