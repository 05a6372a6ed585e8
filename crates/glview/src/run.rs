use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use glthread::{
    ContextResourceManager, ErrorCode, ExitStatus, HeadlessDisplay, HeadlessWindow, RenderContext,
    RenderMode, RenderView, Renderer, ViewSettings,
};
use parking_lot::Mutex;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use viewconfig::ViewConfig;

use crate::cli::Cli;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_DURATION: Duration = Duration::from_millis(500);
/// How often a when-dirty view is asked for a frame.
const DIRTY_INTERVAL: Duration = Duration::from_millis(16);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ViewConfig::load(path)
            .with_context(|| format!("failed to load view config {}", path.display()))?,
        None => ViewConfig::default(),
    };
    let plan = RunPlan::resolve(&cli, &config);
    info!(
        width = plan.width,
        height = plan.height,
        mode = mode_name(plan.settings.render_mode),
        duration = %humantime::format_duration(plan.duration),
        "starting headless view"
    );

    let summary = execute(&plan)?;
    println!("{summary}");
    Ok(())
}

/// Run parameters after merging CLI flags over the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub settings: ViewSettings,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
    pub pause_cycles: u32,
    pub lose_context: bool,
}

impl RunPlan {
    pub fn resolve(cli: &Cli, config: &ViewConfig) -> Self {
        let mut settings = ViewSettings::from_config(config);
        if let Some(mode) = cli.mode {
            settings.render_mode = mode.into();
        }
        if cli.preserve_context {
            settings.preserve_context_on_pause = true;
        }

        Self {
            settings,
            width: cli.width.or(config.demo.width).unwrap_or(DEFAULT_WIDTH),
            height: cli.height.or(config.demo.height).unwrap_or(DEFAULT_HEIGHT),
            duration: cli
                .duration
                .or(config.demo.duration)
                .unwrap_or(DEFAULT_DURATION),
            pause_cycles: cli.pause_cycles,
            lose_context: cli.lose_context,
        }
    }
}

#[derive(Debug, Default)]
struct FrameStats {
    contexts: AtomicU64,
    geometry_changes: AtomicU64,
    frames: AtomicU64,
    events: AtomicU64,
    last_geometry: Mutex<Option<(u32, u32)>>,
}

struct CountingRenderer {
    stats: Arc<FrameStats>,
}

impl Renderer<HeadlessDisplay> for CountingRenderer {
    fn on_context_created(&mut self, frame: &RenderContext<'_, HeadlessDisplay>) {
        self.stats.contexts.fetch_add(1, Ordering::Relaxed);
        debug!(
            context = frame.context().id(),
            config = ?frame.config().map(|config| config.id),
            "context created"
        );
    }

    fn on_geometry_changed(
        &mut self,
        _frame: &RenderContext<'_, HeadlessDisplay>,
        width: u32,
        height: u32,
    ) {
        self.stats.geometry_changes.fetch_add(1, Ordering::Relaxed);
        *self.stats.last_geometry.lock() = Some((width, height));
    }

    fn on_draw_frame(&mut self, _frame: &RenderContext<'_, HeadlessDisplay>) {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub render_mode: RenderMode,
    pub frames_drawn: u64,
    pub frames_presented: usize,
    pub contexts_created: u64,
    pub geometry_changes: u64,
    pub last_geometry: Option<(u32, u32)>,
    pub events_run: u64,
    pub live_contexts: usize,
    pub exit_status: ExitStatus,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "render mode: {}", mode_name(self.render_mode))?;
        writeln!(f, "frames drawn: {}", self.frames_drawn)?;
        writeln!(f, "frames presented: {}", self.frames_presented)?;
        writeln!(f, "contexts created: {}", self.contexts_created)?;
        writeln!(f, "geometry changes: {}", self.geometry_changes)?;
        match self.last_geometry {
            Some((width, height)) => writeln!(f, "last geometry: {width}x{height}")?,
            None => writeln!(f, "last geometry: none")?,
        }
        writeln!(f, "events run: {}", self.events_run)?;
        writeln!(f, "live contexts: {}", self.live_contexts)?;
        write!(f, "exit status: {}", status_name(self.exit_status))
    }
}

/// Shows the view, renders for the planned duration with the requested
/// pause/resume cycles, then hides and stops it.
pub fn execute(plan: &RunPlan) -> Result<Summary> {
    let manager = ContextResourceManager::shared();
    let display = HeadlessDisplay::new();
    let journal = display.journal();
    let faults = display.faults();
    let window = HeadlessWindow::new(1);
    let source = move || Some(window.clone());
    let stats = Arc::new(FrameStats::default());

    let mut view = RenderView::with_settings(
        Arc::clone(&manager),
        plan.settings.clone(),
        display,
        source,
    );
    view.set_renderer(CountingRenderer {
        stats: Arc::clone(&stats),
    })?;
    view.surface_available();
    view.resize(plan.width, plan.height);

    let segments = plan.pause_cycles.saturating_add(1);
    let segment = plan.duration / segments;
    for index in 0..segments {
        if index > 0 {
            view.pause();
            debug!(cycle = index, "paused");
            view.resume();
        }
        if plan.lose_context && index + 1 == segments {
            info!("simulating context loss");
            faults.fail_next_swap(ErrorCode::ContextLost);
        }
        let events = Arc::clone(&stats);
        view.queue_event(move || {
            events.events.fetch_add(1, Ordering::Relaxed);
        })?;
        render_for(&view, segment);
    }

    view.surface_lost();
    view.request_exit_and_wait()?;
    if let Some(err) = view.last_error() {
        bail!("render thread stopped with an error: {err}");
    }
    if view.exit_status() == ExitStatus::Crashed {
        bail!("render thread exited without being asked to");
    }

    let summary = Summary {
        render_mode: view.render_mode(),
        frames_drawn: stats.frames.load(Ordering::Relaxed),
        frames_presented: journal.frames_presented(),
        contexts_created: stats.contexts.load(Ordering::Relaxed),
        geometry_changes: stats.geometry_changes.load(Ordering::Relaxed),
        last_geometry: *stats.last_geometry.lock(),
        events_run: stats.events.load(Ordering::Relaxed),
        live_contexts: manager.live_contexts(),
        exit_status: view.exit_status(),
    };
    info!(frames = summary.frames_drawn, "headless view finished");
    Ok(summary)
}

fn render_for(view: &RenderView<HeadlessDisplay>, duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if view.render_mode() == RenderMode::WhenDirty {
            view.request_render();
        }
        thread::sleep(DIRTY_INTERVAL.min(remaining));
    }
}

fn mode_name(mode: RenderMode) -> &'static str {
    match mode {
        RenderMode::WhenDirty => "when-dirty",
        RenderMode::Continuously => "continuously",
    }
}

fn status_name(status: ExitStatus) -> &'static str {
    match status {
        ExitStatus::NotStarted => "not started",
        ExitStatus::Running => "running",
        ExitStatus::Exited => "exited",
        ExitStatus::Crashed => "crashed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("glview").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config() {
        let config = ViewConfig::from_toml_str(
            r#"
version = 1

[view]
render_mode = "when-dirty"

[demo]
width = 320
height = 200
duration = "2s"
"#,
        )
        .unwrap();

        let plan = RunPlan::resolve(&cli(&["--width", "1024", "--preserve-context"]), &config);
        assert_eq!(plan.width, 1024);
        assert_eq!(plan.height, 200);
        assert_eq!(plan.duration, Duration::from_secs(2));
        assert_eq!(plan.settings.render_mode, RenderMode::WhenDirty);
        assert!(plan.settings.preserve_context_on_pause);

        let plan = RunPlan::resolve(&cli(&["--mode", "continuously"]), &ViewConfig::default());
        assert_eq!(plan.settings.render_mode, RenderMode::Continuously);
        assert_eq!((plan.width, plan.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(plan.duration, DEFAULT_DURATION);
    }

    #[test]
    fn scripted_run_recreates_context_after_pause() {
        let plan = RunPlan::resolve(
            &cli(&["--duration", "200ms", "--pause-cycles", "1", "--width", "64", "--height", "48"]),
            &ViewConfig::default(),
        );
        let summary = execute(&plan).unwrap();
        assert_eq!(summary.exit_status, ExitStatus::Exited);
        assert_eq!(summary.live_contexts, 0);
        assert_eq!(summary.events_run, 2);
        assert_eq!(summary.last_geometry, Some((64, 48)));
        assert!(summary.frames_drawn > 0);
        assert!(summary.contexts_created >= 2);
    }

    #[test]
    fn summary_lists_every_counter() {
        let summary = Summary {
            render_mode: RenderMode::WhenDirty,
            frames_drawn: 3,
            frames_presented: 3,
            contexts_created: 1,
            geometry_changes: 1,
            last_geometry: None,
            events_run: 1,
            live_contexts: 0,
            exit_status: ExitStatus::Exited,
        };
        let text = summary.to_string();
        assert!(text.starts_with("render mode: when-dirty\n"));
        assert!(text.contains("last geometry: none"));
        assert!(text.ends_with("exit status: exited"));
    }
}
