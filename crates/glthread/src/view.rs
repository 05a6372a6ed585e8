//! Host-facing lifecycle facade.
//!
//! `RenderView` is what a windowing layer talks to. Until a renderer is set it
//! only collects settings and strategies; `set_renderer` starts the render
//! thread and from then on every lifecycle call is forwarded to the worker's
//! shared state under the monitor, blocking where the host needs an ordering
//! guarantee (a lost drawable must not be touched after `surface_lost`
//! returns, for instance).

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, info, warn};

use crate::backend::{ContextBackend, Strategies};
use crate::display::Display;
use crate::error::{ViewError, WorkerError};
use crate::monitor::{ContextResourceManager, WorkerId};
use crate::renderer::Renderer;
use crate::state::{Event, RenderWorkerState};
use crate::strategy::{
    chooser_for_request, ComponentSizeChooser, ConfigChooser, ContextFactory, DefaultContextFactory,
    DefaultSurfaceFactory, DrawableSource, SimpleConfigChooser, SurfaceFactory,
};
use crate::types::{DebugFlags, ExitStatus, RenderMode, ViewSettings};
use crate::worker::{RenderWorker, WorkerParts};

const ALREADY_STARTED: &str = "renderer has already been set for this view";

type WorkerResult<D> = (WorkerParts<D>, Result<(), WorkerError>);

/// Everything collected before the render thread starts.
struct Setup<D: Display> {
    display: D,
    drawables: Box<dyn DrawableSource<D::Drawable>>,
    config_chooser: Option<Box<dyn ConfigChooser<D>>>,
    context_factory: Option<Box<dyn ContextFactory<D>>>,
    surface_factory: Option<Box<dyn SurfaceFactory<D>>>,
}

pub struct RenderView<D: Display> {
    manager: Arc<ContextResourceManager>,
    settings: ViewSettings,
    setup: Option<Setup<D>>,
    thread: Option<RenderThread<D>>,
    parked: Option<WorkerParts<D>>,
    detached: bool,
    last_status: ExitStatus,
    last_error: Option<WorkerError>,
}

impl<D: Display> RenderView<D> {
    pub fn new(
        manager: Arc<ContextResourceManager>,
        display: D,
        drawables: impl DrawableSource<D::Drawable> + 'static,
    ) -> Self {
        Self::with_settings(manager, ViewSettings::default(), display, drawables)
    }

    pub fn with_settings(
        manager: Arc<ContextResourceManager>,
        settings: ViewSettings,
        display: D,
        drawables: impl DrawableSource<D::Drawable> + 'static,
    ) -> Self {
        Self {
            manager,
            settings,
            setup: Some(Setup {
                display,
                drawables: Box::new(drawables),
                config_chooser: None,
                context_factory: None,
                surface_factory: None,
            }),
            thread: None,
            parked: None,
            detached: false,
            last_status: ExitStatus::NotStarted,
            last_error: None,
        }
    }

    pub fn manager(&self) -> &Arc<ContextResourceManager> {
        &self.manager
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    /// Identity of the running render thread, if any.
    pub fn worker_id(&self) -> Option<WorkerId> {
        self.thread.as_ref().map(|thread| thread.id)
    }

    fn setup_mut(&mut self) -> Result<&mut Setup<D>, ViewError> {
        match self.setup.as_mut() {
            Some(setup) if self.thread.is_none() => Ok(setup),
            _ => Err(ViewError::InvalidState(ALREADY_STARTED.to_string())),
        }
    }

    pub fn set_config_chooser(
        &mut self,
        chooser: impl ConfigChooser<D> + 'static,
    ) -> Result<(), ViewError> {
        self.setup_mut()?.config_chooser = Some(Box::new(chooser));
        Ok(())
    }

    /// RGB888, with a 16-bit depth buffer when `with_depth_buffer` is set.
    pub fn set_simple_config_chooser(&mut self, with_depth_buffer: bool) -> Result<(), ViewError> {
        let chooser = SimpleConfigChooser::new(with_depth_buffer, self.settings.context_client_version);
        self.set_config_chooser(chooser)
    }

    pub fn set_component_config_chooser(
        &mut self,
        red: u8,
        green: u8,
        blue: u8,
        alpha: u8,
        depth: u8,
        stencil: u8,
    ) -> Result<(), ViewError> {
        let chooser = ComponentSizeChooser::new(
            red,
            green,
            blue,
            alpha,
            depth,
            stencil,
            self.settings.context_client_version,
        );
        self.set_config_chooser(chooser)
    }

    pub fn set_context_factory(
        &mut self,
        factory: impl ContextFactory<D> + 'static,
    ) -> Result<(), ViewError> {
        self.setup_mut()?.context_factory = Some(Box::new(factory));
        Ok(())
    }

    pub fn set_surface_factory(
        &mut self,
        factory: impl SurfaceFactory<D> + 'static,
    ) -> Result<(), ViewError> {
        self.setup_mut()?.surface_factory = Some(Box::new(factory));
        Ok(())
    }

    /// Must be called before a config chooser is set to affect it.
    pub fn set_context_client_version(&mut self, version: u32) -> Result<(), ViewError> {
        self.setup_mut()?;
        self.settings.context_client_version = version;
        Ok(())
    }

    pub fn set_debug_flags(&mut self, debug: DebugFlags) -> Result<(), ViewError> {
        self.setup_mut()?;
        self.settings.debug = debug;
        Ok(())
    }

    pub fn preserve_context_on_pause(&self) -> bool {
        self.settings.preserve_context_on_pause
    }

    /// Takes effect at the next pause, even while running.
    pub fn set_preserve_context_on_pause(&mut self, preserve: bool) {
        self.settings.preserve_context_on_pause = preserve;
        if let Some(thread) = &self.thread {
            thread.update(|state| state.preserve_context_on_pause = preserve);
        }
    }

    /// Starts the render thread. Strategies that were not set get defaults.
    pub fn set_renderer(&mut self, renderer: impl Renderer<D> + 'static) -> Result<(), ViewError> {
        self.setup_mut()?;
        let Some(setup) = self.setup.take() else {
            return Err(ViewError::InvalidState(ALREADY_STARTED.to_string()));
        };
        let client_version = self.settings.context_client_version;
        let strategies = Strategies {
            config_chooser: setup
                .config_chooser
                .unwrap_or_else(|| chooser_for_request(self.settings.surface, client_version)),
            context_factory: setup
                .context_factory
                .unwrap_or_else(|| Box::new(DefaultContextFactory)),
            surface_factory: setup
                .surface_factory
                .unwrap_or_else(|| Box::new(DefaultSurfaceFactory)),
        };
        let parts = WorkerParts {
            backend: ContextBackend::new(setup.display, strategies, client_version),
            drawables: setup.drawables,
            renderer: Some(Box::new(renderer)),
        };
        self.start(parts)
    }

    fn start(&mut self, parts: WorkerParts<D>) -> Result<(), ViewError> {
        let state = RenderWorkerState::new(
            self.settings.render_mode,
            self.settings.preserve_context_on_pause,
        );
        let id = self.manager.register(state);
        let worker = RenderWorker::new(id, Arc::clone(&self.manager), parts, self.settings.debug);

        let join = thread::Builder::new()
            .name(format!("glthread-{id}"))
            .spawn(move || worker.run())
            .map_err(|err| {
                self.manager.unregister(id);
                ViewError::Spawn(err)
            })?;

        info!(worker = %id, "render thread started");
        self.thread = Some(RenderThread {
            id,
            thread_id: join.thread().id(),
            join: Some(join),
            manager: Arc::clone(&self.manager),
        });
        self.last_status = ExitStatus::Running;
        Ok(())
    }

    pub fn surface_available(&self) {
        if let Some(thread) = &self.thread {
            thread.surface_available();
        }
    }

    pub fn surface_lost(&self) {
        if let Some(thread) = &self.thread {
            thread.surface_lost();
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        if let Some(thread) = &self.thread {
            thread.resize(width, height);
        }
    }

    pub fn pause(&self) {
        if let Some(thread) = &self.thread {
            thread.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(thread) = &self.thread {
            thread.resume();
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.thread
            .as_ref()
            .and_then(RenderThread::render_mode)
            .unwrap_or(self.settings.render_mode)
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.settings.render_mode = mode;
        if let Some(thread) = &self.thread {
            thread.update(|state| state.render_mode = mode);
        }
    }

    /// Accepts the raw mode codes hosts pass around: 0 for when-dirty, 1 for
    /// continuous rendering.
    pub fn set_render_mode_code(&mut self, code: i32) -> Result<(), ViewError> {
        let mode = RenderMode::try_from(code)?;
        self.set_render_mode(mode);
        Ok(())
    }

    pub fn request_render(&self) {
        if let Some(thread) = &self.thread {
            thread.update(|state| state.request_render = true);
        }
    }

    /// Requests a frame and runs `finish_drawing` on the render thread once it
    /// has been drawn, or as soon as the thread finds it cannot draw.
    pub fn request_render_and_notify(&self, finish_drawing: impl FnOnce() + Send + 'static) {
        if let Some(thread) = &self.thread {
            thread.request_render_and_notify(Box::new(finish_drawing));
        }
    }

    /// Runs `event` on the render thread before it next considers drawing.
    pub fn queue_event(&self, event: impl FnOnce() + Send + 'static) -> Result<(), ViewError> {
        let thread = self.thread.as_ref().ok_or_else(|| {
            ViewError::InvalidState("no render thread is running for this view".to_string())
        })?;
        thread.update(|state| state.event_queue.push_back(Box::new(event)));
        Ok(())
    }

    /// Asks the render thread to give up its context at the next pass.
    pub fn request_release_context(&self) {
        if let Some(thread) = &self.thread {
            thread.update(|state| state.should_release_context = true);
        }
    }

    /// Stops the render thread and waits for it. A stopped view never draws
    /// again unless it is detached and re-attached.
    pub fn request_exit_and_wait(&mut self) -> Result<(), ViewError> {
        let Some(thread) = self.thread.as_mut() else {
            return Ok(());
        };
        thread.request_exit_and_wait()?;
        self.reap();
        Ok(())
    }

    /// The view was removed from its window: stop the render thread but keep
    /// the renderer so `on_attached` can start a new one.
    pub fn on_detached(&mut self) -> Result<(), ViewError> {
        debug!("view detached");
        self.request_exit_and_wait()?;
        self.detached = true;
        Ok(())
    }

    /// Restarts rendering after `on_detached`, keeping the renderer and the
    /// render mode.
    pub fn on_attached(&mut self) -> Result<(), ViewError> {
        debug!(reattach = self.detached, "view attached");
        if self.detached && self.thread.is_none() {
            match self.parked.take() {
                Some(parts) if parts.renderer.is_some() => self.start(parts)?,
                other => self.parked = other,
            }
        }
        self.detached = false;
        Ok(())
    }

    pub fn exit_status(&self) -> ExitStatus {
        self.thread
            .as_ref()
            .and_then(RenderThread::status)
            .unwrap_or(self.last_status)
    }

    /// Why the last render thread stopped, if it failed.
    pub fn last_error(&self) -> Option<&WorkerError> {
        self.last_error.as_ref()
    }

    fn reap(&mut self) {
        let Some(mut thread) = self.thread.take() else {
            return;
        };
        let requested = thread.exit_requested();
        let (parts, result) = thread.join();
        self.parked = parts;
        self.last_status = match &result {
            Ok(()) if requested => ExitStatus::Exited,
            _ => ExitStatus::Crashed,
        };
        self.last_error = result.err();
    }
}

/// Handle on one running render thread.
struct RenderThread<D: Display> {
    id: WorkerId,
    thread_id: ThreadId,
    join: Option<JoinHandle<WorkerResult<D>>>,
    manager: Arc<ContextResourceManager>,
}

impl<D: Display> RenderThread<D> {
    fn on_render_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Applies `change` to the worker's state and wakes it.
    fn update(&self, change: impl FnOnce(&mut RenderWorkerState)) {
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            change(state);
        }
        self.manager.notify_all();
    }

    fn render_mode(&self) -> Option<RenderMode> {
        self.manager.lock().worker(self.id).map(|state| state.render_mode)
    }

    fn status(&self) -> Option<ExitStatus> {
        let registry = self.manager.lock();
        let state = registry.worker(self.id)?;
        Some(match (state.exited, state.should_exit) {
            (false, _) => ExitStatus::Running,
            (true, true) => ExitStatus::Exited,
            (true, false) => ExitStatus::Crashed,
        })
    }

    fn exit_requested(&self) -> bool {
        self.manager
            .lock()
            .worker(self.id)
            .map_or(false, |state| state.should_exit)
    }

    fn surface_available(&self) {
        debug!(worker = %self.id, "surface available");
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            state.has_surface = true;
            state.finished_creating_surface = false;
        }
        self.manager.notify_all();
        self.manager.wait_while(&mut registry, self.id, |state| {
            state.waiting_for_surface && !state.finished_creating_surface && !state.exited
        });
    }

    fn surface_lost(&self) {
        debug!(worker = %self.id, "surface lost");
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            state.has_surface = false;
        }
        self.manager.notify_all();
        self.manager.wait_while(&mut registry, self.id, |state| {
            !state.waiting_for_surface && !state.exited
        });
    }

    fn resize(&self, width: u32, height: u32) {
        debug!(worker = %self.id, width, height, "resize");
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            state.width = width;
            state.height = height;
            state.size_changed = true;
            state.request_render = true;
            state.render_complete = false;
        }
        // Called back from the renderer: the next pass picks it up.
        if self.on_render_thread() {
            return;
        }
        self.manager.notify_all();
        self.manager.wait_while(&mut registry, self.id, |state| {
            !state.exited && !state.paused && !state.render_complete && state.able_to_draw()
        });
    }

    fn pause(&self) {
        debug!(worker = %self.id, "pause");
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            state.requested_paused = true;
        }
        self.manager.notify_all();
        self.manager
            .wait_while(&mut registry, self.id, |state| !state.exited && !state.paused);
    }

    fn resume(&self) {
        debug!(worker = %self.id, "resume");
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            state.requested_paused = false;
            state.request_render = true;
            state.render_complete = false;
        }
        self.manager.notify_all();
        self.manager.wait_while(&mut registry, self.id, |state| {
            !state.exited && state.paused && !state.render_complete
        });
    }

    fn request_render_and_notify(&self, finish_drawing: Event) {
        if self.on_render_thread() {
            return;
        }
        self.update(|state| {
            state.want_render_notification = true;
            state.request_render = true;
            state.render_complete = false;
            state.finish_drawing = Some(finish_drawing);
        });
    }

    fn request_exit_and_wait(&self) -> Result<(), ViewError> {
        if self.on_render_thread() {
            return Err(ViewError::InvalidState(
                "request_exit_and_wait called from the render thread".to_string(),
            ));
        }
        let mut registry = self.manager.lock();
        if let Some(state) = registry.worker_mut(self.id) {
            state.should_exit = true;
        }
        self.manager.notify_all();
        self.manager.wait_while(&mut registry, self.id, |state| !state.exited);
        Ok(())
    }

    /// Joins the thread and drops its registry entry. Parts are `None` when
    /// the thread panicked.
    fn join(&mut self) -> (Option<WorkerParts<D>>, Result<(), WorkerError>) {
        let joined = match self.join.take() {
            Some(handle) => match handle.join() {
                Ok((parts, result)) => (Some(parts), result),
                Err(payload) => (None, Err(WorkerError::Panicked(panic_message(payload)))),
            },
            None => (None, Ok(())),
        };
        self.manager.unregister(self.id);
        joined
    }
}

impl<D: Display> Drop for RenderThread<D> {
    fn drop(&mut self) {
        if self.join.is_none() {
            return;
        }
        self.update(|state| {
            state.renderer_detached = true;
            state.should_exit = true;
        });
        if self.on_render_thread() {
            // Cannot wait for ourselves. The loop exits on its next pass and
            // unregisters itself in teardown.
            return;
        }
        if let Err(err) = self.request_exit_and_wait() {
            warn!(worker = %self.id, error = %err, "render thread did not stop cleanly");
        }
        let (_, result) = self.join();
        if let Err(err) = result {
            warn!(worker = %self.id, error = %err, "render thread ended with an error");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
