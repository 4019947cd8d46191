use std::fs;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal;
use directories::ProjectDirs;
use pdfscroll_core::config::CONFIG_FILE_NAME;
use pdfscroll_core::{
    load_initial, spawn_background_load, Command, Document, PageCache, StatusLine, TickCounter,
    ViewerConfig, ViewportController,
};
use pdfscroll_render::{PdfiumProviderFactory, RenderOptions};
use pdfscroll_tty::{EventMapper, KittySurface, SurfaceGeometry, UiEvent};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdfscroll",
    version,
    about = "Continuously scrolling PDF reader for kitty-compatible terminals"
)]
struct Args {
    /// PDF file to open
    file: PathBuf,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ticks per second of the scroll loop
    #[arg(long)]
    tps: Option<u32>,

    /// Pages decoded per background batch
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
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
    if !args.file.is_file() {
        bail!("file does not exist: {}", args.file.display());
    }

    let project_dirs = ProjectDirs::from("net", "pdfscroll", "pdfscroll")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let config = load_config(&args, &project_dirs.config_dir().join(CONFIG_FILE_NAME))?;
    let _log_guard = init_logging(&project_dirs)?;
    info!(path = %args.file.display(), "starting viewer");

    let geometry = SurfaceGeometry::query().context("failed to query terminal size")?;
    let (width, height) = if config.viewport.fit_terminal && geometry.measured {
        geometry.viewport_size()
    } else {
        (config.viewport.width, config.viewport.height)
    };
    let target_width = match config.render.target_width {
        0 => width.round() as u32,
        explicit => explicit,
    };

    let provider = PdfiumProviderFactory::new(RenderOptions {
        target_width,
        library_path: config.render.pdfium_library.clone(),
    })?;
    let document = Document::open_with(&provider, &args.file)
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;
    load_initial(document.pages.as_ref(), &document.cache)?;
    let background = spawn_background_load(
        Arc::clone(&document.pages),
        Arc::clone(&document.cache),
        config.loader.batch_size,
    )?;

    let mut viewport = config.viewport_config();
    viewport.width = width;
    viewport.height = height;
    let mut viewer = Viewer {
        controller: ViewportController::new(document.info.page_count, viewport),
        cache: Arc::clone(&document.cache),
        mapper: EventMapper::new(config.scroll.steps()),
        surface: KittySurface::new(io::stdout(), geometry),
        fit_terminal: config.viewport.fit_terminal,
        ticks: TickCounter::default(),
    };

    let raw = RawModeGuard::new()?;
    crossterm::execute!(viewer.surface.writer(), cursor::Hide)?;
    viewer.surface.clear_all()?;

    let outcome = viewer.run(config.tick_interval()).await;

    viewer.surface.release_images()?;
    viewer.surface.clear_all()?;
    drop(raw);

    if background.is_finished() {
        let report = background.join();
        match &report.error {
            Some(err) => warn!(loaded = report.loaded, "document only partially loaded: {}", err),
            None => info!(loaded = report.loaded, "document fully loaded"),
        }
    } else {
        info!(
            cached = document.cache.loaded_count(),
            page_count = document.info.page_count,
            "quitting while pages are still loading"
        );
    }
    outcome
}

enum LoopAction {
    Continue,
    Quit,
}

struct Viewer {
    controller: ViewportController,
    cache: Arc<PageCache>,
    mapper: EventMapper,
    surface: KittySurface<Stdout>,
    fit_terminal: bool,
    ticks: TickCounter,
}

impl Viewer {
    async fn run(&mut self, tick: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.ticks.record(Instant::now());

            while event::poll(Duration::ZERO)? {
                let ui_event = self.mapper.map_event(event::read()?);
                if let LoopAction::Quit = self.handle_event(ui_event)? {
                    info!("quit requested");
                    return Ok(());
                }
            }

            self.controller
                .advance(self.cache.as_ref())
                .context("viewport invariant violated")?;
            self.draw()?;
        }
    }

    fn handle_event(&mut self, ui_event: UiEvent) -> Result<LoopAction> {
        match ui_event {
            UiEvent::Quit => return Ok(LoopAction::Quit),
            UiEvent::Command(command) => self.controller.apply(command, self.cache.as_ref()),
            UiEvent::Resize { columns, rows } => {
                let geometry = self.surface.geometry().resized(columns, rows);
                self.surface.set_geometry(geometry);
                if self.fit_terminal {
                    let (width, height) = geometry.viewport_size();
                    self.controller
                        .apply(Command::Resize { width, height }, self.cache.as_ref());
                }
                self.surface.clear_all()?;
            }
            UiEvent::None => {}
        }
        Ok(LoopAction::Continue)
    }

    fn draw(&mut self) -> Result<()> {
        let commands = self.controller.draw_list(self.cache.as_ref());
        let status = StatusLine::capture(&self.controller, &self.cache, self.ticks.rate());
        let config = self.controller.config();
        let viewport = (config.width, config.height);
        self.surface
            .draw_frame(&commands, &self.cache, viewport, &status.to_string())
    }
}

fn load_config(args: &Args, default_path: &Path) -> Result<ViewerConfig> {
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::load_or_default(default_path)?,
    };
    if let Some(tps) = args.tps {
        config.render.ticks_per_second = tps;
    }
    if let Some(batch_size) = args.batch_size {
        config.loader.batch_size = batch_size;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfscroll.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the page surface, so logs only go to the file.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_accept_overrides() {
        let args = Args::try_parse_from([
            "pdfscroll",
            "paper.pdf",
            "--tps",
            "30",
            "--batch-size",
            "8",
        ])
        .unwrap();
        assert_eq!(args.file, PathBuf::from("paper.pdf"));
        assert_eq!(args.tps, Some(30));
        assert_eq!(args.batch_size, Some(8));
        assert!(args.config.is_none());
    }

    #[test]
    fn args_require_a_file() {
        assert!(Args::try_parse_from(["pdfscroll"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.toml");
        fs::write(&path, "[render]\nticks_per_second = 120\n\n[loader]\nbatch_size = 2\n").unwrap();
        let config_arg = path.to_str().unwrap();

        let args = Args::try_parse_from([
            "pdfscroll",
            "paper.pdf",
            "--config",
            config_arg,
            "--tps",
            "24",
        ])
        .unwrap();
        let config = load_config(&args, &dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.render.ticks_per_second, 24);
        assert_eq!(config.loader.batch_size, 2);
    }

    #[test]
    fn flag_repairs_invalid_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.toml");
        fs::write(&path, "[render]\nticks_per_second = 0\n").unwrap();
        let config_arg = path.to_str().unwrap();

        let args = Args::try_parse_from([
            "pdfscroll",
            "paper.pdf",
            "--config",
            config_arg,
            "--tps",
            "30",
        ])
        .unwrap();
        let config = load_config(&args, &dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.render.ticks_per_second, 30);

        let args =
            Args::try_parse_from(["pdfscroll", "paper.pdf", "--config", config_arg]).unwrap();
        let err = load_config(&args, &dir.path().join(CONFIG_FILE_NAME)).unwrap_err();
        assert!(err.to_string().contains("ticks_per_second"));
    }

    #[test]
    fn missing_default_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from(["pdfscroll", "paper.pdf"]).unwrap();

        let config = load_config(&args, &dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    fn zero_overrides_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args =
            Args::try_parse_from(["pdfscroll", "paper.pdf", "--batch-size", "0"]).unwrap();

        let err = load_config(&args, &dir.path().join(CONFIG_FILE_NAME)).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }
}
