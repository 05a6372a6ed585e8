//! The render thread body.
//!
//! Each pass takes the monitor, evaluates [`transition`], performs the
//! backend work that has to happen under the lock, and then either sleeps,
//! runs a queued event, or draws a frame with the lock released. Teardown is
//! guaranteed by a guard so a panicking renderer still gives back its context
//! and wakes every waiter.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::backend::{ContextBackend, PresentOutcome};
use crate::display::{format_error, Display};
use crate::error::{BackendError, WorkerError};
use crate::monitor::{ContextResourceManager, Registry, WorkerId};
use crate::renderer::{RenderContext, Renderer};
use crate::state::{transition, Held, LockedAction, Outcome, PassLocals};
use crate::strategy::DrawableSource;
use crate::types::DebugFlags;

/// What a render thread hands back when it stops, so a view can start a new
/// thread with the same renderer and backend.
pub struct WorkerParts<D: Display> {
    pub backend: ContextBackend<D>,
    pub drawables: Box<dyn DrawableSource<D::Drawable>>,
    /// `None` once the renderer has been detached.
    pub renderer: Option<Box<dyn Renderer<D>>>,
}

pub struct RenderWorker<D: Display> {
    core: WorkerCore<D>,
    renderer: Option<Box<dyn Renderer<D>>>,
}

struct WorkerCore<D: Display> {
    id: WorkerId,
    manager: Arc<ContextResourceManager>,
    backend: ContextBackend<D>,
    drawables: Box<dyn DrawableSource<D::Drawable>>,
    context: Option<D::Context>,
    surface: Option<D::Surface>,
    pending_drawable: Option<D::Drawable>,
    debug: DebugFlags,
}

impl<D: Display> RenderWorker<D> {
    pub(crate) fn new(
        id: WorkerId,
        manager: Arc<ContextResourceManager>,
        parts: WorkerParts<D>,
        debug: DebugFlags,
    ) -> Self {
        Self {
            core: WorkerCore {
                id,
                manager,
                backend: parts.backend,
                drawables: parts.drawables,
                context: None,
                surface: None,
                pending_drawable: None,
                debug,
            },
            renderer: parts.renderer,
        }
    }

    /// Runs until asked to exit or until a fatal backend error. Surface and
    /// context are always released before this returns or unwinds.
    pub(crate) fn run(self) -> (WorkerParts<D>, Result<(), WorkerError>) {
        let RenderWorker {
            mut core,
            mut renderer,
        } = self;
        debug!(worker = %core.id, "render thread starting");

        let result = {
            let guard = ExitGuard {
                core: &mut core,
                armed: true,
            };
            let result = guard.core.run_loop(&mut renderer);
            let teardown = guard.complete();
            result.and(teardown)
        };

        match &result {
            Ok(()) => debug!(worker = %core.id, "render thread exiting"),
            Err(err) => error!(worker = %core.id, error = %err, "render thread exiting on error"),
        }

        let parts = WorkerParts {
            backend: core.backend,
            drawables: core.drawables,
            renderer,
        };
        (parts, result)
    }
}

impl<D: Display> WorkerCore<D> {
    fn run_loop(&mut self, renderer: &mut Option<Box<dyn Renderer<D>>>) -> Result<(), WorkerError> {
        let manager = Arc::clone(&self.manager);
        let mut pass = PassLocals::default();

        loop {
            let outcome = {
                let mut registry = manager.lock();
                loop {
                    let Some(state) = registry.worker_mut(self.id) else {
                        return Ok(());
                    };
                    let step = transition(state, &mut pass);
                    for action in step.actions {
                        self.perform_locked(&mut registry, action)?;
                    }
                    if matches!(step.outcome, Outcome::Draw) && pass.create_surface {
                        self.pending_drawable = self.drawables.current_drawable();
                    }
                    if step.notify {
                        manager.notify_all();
                    }
                    match step.outcome {
                        Outcome::Wait => {
                            trace!(worker = %self.id, "waiting");
                            manager.wait(&mut registry);
                        }
                        outcome => break outcome,
                    }
                }
            };

            // Dropped here, on this thread, while the context is still held.
            if pass.renderer_detached && renderer.take().is_some() {
                debug!(worker = %self.id, "renderer detached");
            }

            match outcome {
                Outcome::Exit => return Ok(()),
                Outcome::RunEvent(event) => event(),
                Outcome::FinishEarly(callback) => {
                    warn!(
                        worker = %self.id,
                        "not ready to draw but a finish-drawing callback is pending, reporting it early"
                    );
                    callback();
                }
                Outcome::Draw => self.draw(&mut pass, renderer)?,
                Outcome::Wait => {}
            }
        }
    }

    fn perform_locked(&mut self, registry: &mut Registry, action: LockedAction) -> Result<(), WorkerError> {
        match action {
            LockedAction::AcquireContext => match self.backend.acquire_context() {
                Ok(context) => {
                    self.context = Some(context);
                    self.manager.context_acquired_locked(registry, self.id);
                    Ok(())
                }
                Err(err) => {
                    self.manager.release_context_locked(registry, self.id);
                    Err(WorkerError::ContextAcquisition(err))
                }
            },
            LockedAction::ReleaseSurface => self.release_surface(),
            LockedAction::ReleaseContext => {
                let result = self.release_surface().and(self.release_context());
                self.manager.release_context_locked(registry, self.id);
                result
            }
        }
    }

    fn draw(
        &mut self,
        pass: &mut PassLocals,
        renderer: &mut Option<Box<dyn Renderer<D>>>,
    ) -> Result<(), WorkerError> {
        if pass.create_surface {
            let created = self.create_surface()?;
            let mut registry = self.manager.lock();
            if let Some(state) = registry.worker_mut(self.id) {
                state.finished_creating_surface = true;
                if !created {
                    state.surface_is_bad = true;
                }
            }
            self.manager.notify_all();
            if !created {
                return Ok(());
            }
            pass.create_surface = false;
        }

        let (Some(context), Some(surface)) = (self.context.as_ref(), self.surface.as_ref()) else {
            return Ok(());
        };

        if let Some(renderer) = renderer.as_mut() {
            let frame = RenderContext::new(
                self.backend.display(),
                context,
                surface,
                self.backend.config(),
                self.debug,
            );
            if pass.create_context {
                self.log_call("on_context_created");
                renderer.on_context_created(&frame);
            }
            if pass.size_changed {
                self.log_call("on_geometry_changed");
                renderer.on_geometry_changed(&frame, pass.width, pass.height);
            }
            self.log_call("on_draw_frame");
            renderer.on_draw_frame(&frame);
        }
        pass.create_context = false;
        pass.size_changed = false;

        if let Some(callback) = pass.finish_drawing.take() {
            callback();
        }

        if self.debug.check_errors {
            if let Some(code) = self.backend.check_error() {
                warn!(worker = %self.id, "{}", format_error("on_draw_frame", code));
            }
        }

        match self.backend.present(surface) {
            PresentOutcome::Presented => {}
            PresentOutcome::ContextLost => {
                debug!(worker = %self.id, "context lost");
                pass.lost_context = true;
            }
            PresentOutcome::Failed(code) => {
                // Usually the drawable went away before the host told us.
                warn!(worker = %self.id, "{}", format_error("eglSwapBuffers", code));
                let mut registry = self.manager.lock();
                if let Some(state) = registry.worker_mut(self.id) {
                    state.surface_is_bad = true;
                }
                self.manager.notify_all();
            }
        }

        if pass.want_render_notification {
            pass.do_render_notification = true;
            pass.want_render_notification = false;
        }
        Ok(())
    }

    /// Replaces the current surface with one for the drawable captured under
    /// the monitor. `Ok(false)` means the drawable cannot be used right now.
    fn create_surface(&mut self) -> Result<bool, WorkerError> {
        self.release_surface()?;
        let Some(context) = self.context.as_ref() else {
            return Ok(false);
        };
        let Some(drawable) = self.pending_drawable.take() else {
            debug!(worker = %self.id, error = %BackendError::NoDrawable, "surface not created");
            return Ok(false);
        };
        match self.backend.acquire_surface(context, drawable) {
            Ok(surface) => {
                self.surface = Some(surface);
                Ok(true)
            }
            Err(source @ BackendError::Destroy { .. }) => Err(WorkerError::Release {
                resource: "surface",
                source,
            }),
            Err(err) => {
                debug!(worker = %self.id, error = %err, "surface not created");
                Ok(false)
            }
        }
    }

    fn release_surface(&mut self) -> Result<(), WorkerError> {
        match self.surface.take() {
            Some(surface) => self
                .backend
                .release_surface(surface)
                .map_err(|source| WorkerError::Release {
                    resource: "surface",
                    source,
                }),
            None => Ok(()),
        }
    }

    fn release_context(&mut self) -> Result<(), WorkerError> {
        match self.context.take() {
            Some(context) => self
                .backend
                .release_context(context)
                .map_err(|source| WorkerError::Release {
                    resource: "context",
                    source,
                }),
            None => Ok(()),
        }
    }

    fn teardown(&mut self) -> Result<(), WorkerError> {
        let manager = Arc::clone(&self.manager);
        let mut registry = manager.lock();
        let surface = self.release_surface();
        let context = self.release_context();
        manager.release_context_locked(&mut registry, self.id);
        let orphaned = match registry.worker_mut(self.id) {
            Some(state) => {
                state.held = Held::Nothing;
                state.exited = true;
                state.renderer_detached
            }
            None => false,
        };
        // The view is gone and may not be around to join us.
        if orphaned {
            manager.unregister_locked(&mut registry, self.id);
            debug!(worker = %self.id, "unregistered after its view was dropped");
        }
        manager.notify_all();
        surface.and(context)
    }

    fn log_call(&self, name: &'static str) {
        if self.debug.log_calls {
            debug!(worker = %self.id, "{name}");
        } else {
            trace!(worker = %self.id, "{name}");
        }
    }
}

/// Tears the worker down if the run loop unwinds.
struct ExitGuard<'a, D: Display> {
    core: &'a mut WorkerCore<D>,
    armed: bool,
}

impl<D: Display> ExitGuard<'_, D> {
    fn complete(mut self) -> Result<(), WorkerError> {
        self.armed = false;
        self.core.teardown()
    }
}

impl<D: Display> Drop for ExitGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.core.teardown() {
                error!(worker = %self.core.id, error = %err, "teardown after panic failed");
            }
        }
    }
}
