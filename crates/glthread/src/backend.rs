use tracing::{debug, error, warn};

use crate::display::{format_error, ConfigDescriptor, Display, ErrorCode};
use crate::error::BackendError;
use crate::strategy::{ConfigChooser, ContextFactory, SurfaceFactory};

/// Result of presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The context was lost; surface and context must both be recreated.
    ContextLost,
    /// Any other swap failure. Usually the drawable went away before the host
    /// reported it.
    Failed(ErrorCode),
}

/// The three strategy objects a view hands to its backend.
pub struct Strategies<D: Display> {
    pub config_chooser: Box<dyn ConfigChooser<D>>,
    pub context_factory: Box<dyn ContextFactory<D>>,
    pub surface_factory: Box<dyn SurfaceFactory<D>>,
}

/// Acquires and releases the context and window surface of one render thread
/// and presents its frames.
///
/// Owned by the render thread; never shared.
pub struct ContextBackend<D: Display> {
    display: D,
    strategies: Strategies<D>,
    client_version: u32,
    config: Option<ConfigDescriptor>,
}

impl<D: Display> ContextBackend<D> {
    pub fn new(display: D, strategies: Strategies<D>, client_version: u32) -> Self {
        Self {
            display,
            strategies,
            client_version,
            config: None,
        }
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Config chosen for the current context, if one is held.
    pub fn config(&self) -> Option<&ConfigDescriptor> {
        self.config.as_ref()
    }

    /// Initializes the display, chooses a config and creates a context.
    /// Every failure here is fatal for the render thread.
    pub fn acquire_context(&mut self) -> Result<D::Context, BackendError> {
        debug!(thread = ?std::thread::current().id(), "acquiring context");
        let (major, minor) = self
            .display
            .initialize()
            .map_err(|code| BackendError::call("eglInitialize", code))?;
        debug!(major, minor, "display initialized");

        let config = match self.strategies.config_chooser.choose_config(&self.display) {
            Ok(config) => config,
            Err(err) => {
                self.display.terminate();
                return Err(err);
            }
        };

        match self.strategies.context_factory.create_context(
            &mut self.display,
            &config,
            self.client_version,
        ) {
            Ok(context) => {
                debug!(config = config.id, "context created");
                self.config = Some(config);
                Ok(context)
            }
            Err(code) => {
                error!("{}", format_error("createContext", code));
                self.display.terminate();
                Err(BackendError::call("createContext", code))
            }
        }
    }

    /// Creates a window surface for `drawable` and makes it current with
    /// `context`. Failures are recoverable: the drawable is probably stale.
    pub fn acquire_surface(
        &mut self,
        context: &D::Context,
        drawable: D::Drawable,
    ) -> Result<D::Surface, BackendError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| BackendError::call("createSurface", ErrorCode::NotInitialized))?;

        let surface = match self.strategies.surface_factory.create_window_surface(
            &mut self.display,
            &config,
            drawable,
        ) {
            Ok(surface) => surface,
            Err(code) => {
                if code == ErrorCode::BadNativeWindow {
                    error!("createWindowSurface returned EGL_BAD_NATIVE_WINDOW");
                }
                return Err(BackendError::SurfaceUnavailable(code));
            }
        };

        if let Err(code) = self.display.make_current(Some((&surface, context))) {
            // Usually the native window was destroyed underneath us.
            warn!("{}", format_error("eglMakeCurrent", code));
            self.strategies
                .surface_factory
                .destroy_surface(&mut self.display, surface)?;
            return Err(BackendError::call("eglMakeCurrent", code));
        }
        Ok(surface)
    }

    pub fn present(&mut self, surface: &D::Surface) -> PresentOutcome {
        match self.display.swap_buffers(surface) {
            Ok(()) => PresentOutcome::Presented,
            Err(ErrorCode::ContextLost) => PresentOutcome::ContextLost,
            Err(code) => PresentOutcome::Failed(code),
        }
    }

    pub fn release_surface(&mut self, surface: D::Surface) -> Result<(), BackendError> {
        debug!(thread = ?std::thread::current().id(), "releasing surface");
        if let Err(code) = self.display.make_current(None) {
            debug!("{}", format_error("eglMakeCurrent", code));
        }
        self.strategies
            .surface_factory
            .destroy_surface(&mut self.display, surface)
    }

    /// Destroys the context and terminates the display. The display is
    /// terminated even when destruction fails.
    pub fn release_context(&mut self, context: D::Context) -> Result<(), BackendError> {
        debug!(thread = ?std::thread::current().id(), "releasing context");
        let result = self
            .strategies
            .context_factory
            .destroy_context(&mut self.display, context);
        self.display.terminate();
        self.config = None;
        result
    }

    pub fn check_error(&mut self) -> Option<ErrorCode> {
        self.display.check_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{DisplayCall, HeadlessDisplay, HeadlessWindow};
    use crate::strategy::{DefaultContextFactory, DefaultSurfaceFactory, SimpleConfigChooser};

    fn backend(display: HeadlessDisplay) -> ContextBackend<HeadlessDisplay> {
        ContextBackend::new(
            display,
            Strategies {
                config_chooser: Box::new(SimpleConfigChooser::new(true, 2)),
                context_factory: Box::new(DefaultContextFactory),
                surface_factory: Box::new(DefaultSurfaceFactory),
            },
            2,
        )
    }

    #[test]
    fn acquires_and_releases_in_order() {
        let display = HeadlessDisplay::new();
        let journal = display.journal();
        let mut backend = backend(display);

        let context = backend.acquire_context().unwrap();
        assert!(backend.config().is_some());
        let surface = backend
            .acquire_surface(&context, HeadlessWindow::new(1))
            .unwrap();
        assert_eq!(backend.present(&surface), PresentOutcome::Presented);
        backend.release_surface(surface).unwrap();
        backend.release_context(context).unwrap();
        assert!(backend.config().is_none());

        let calls = journal.calls();
        assert_eq!(calls.first(), Some(&DisplayCall::Initialize));
        assert_eq!(calls.last(), Some(&DisplayCall::Terminate));
        assert!(journal.count(|call| matches!(call, DisplayCall::SwapBuffers(_))) == 1);
    }

    #[test]
    fn stale_window_is_recoverable() {
        let display = HeadlessDisplay::new();
        let mut backend = backend(display);
        let context = backend.acquire_context().unwrap();

        let window = HeadlessWindow::new(9);
        window.invalidate();
        let err = backend.acquire_surface(&context, window).unwrap_err();
        assert_eq!(
            err,
            BackendError::SurfaceUnavailable(ErrorCode::BadNativeWindow)
        );
        backend.release_context(context).unwrap();
    }

    #[test]
    fn swap_errors_map_to_outcomes() {
        let display = HeadlessDisplay::new();
        let faults = display.faults();
        let mut backend = backend(display);
        let context = backend.acquire_context().unwrap();
        let surface = backend
            .acquire_surface(&context, HeadlessWindow::new(2))
            .unwrap();

        faults.fail_next_swap(ErrorCode::ContextLost);
        assert_eq!(backend.present(&surface), PresentOutcome::ContextLost);
        faults.fail_next_swap(ErrorCode::BadSurface);
        assert_eq!(
            backend.present(&surface),
            PresentOutcome::Failed(ErrorCode::BadSurface)
        );
        assert_eq!(backend.present(&surface), PresentOutcome::Presented);
    }

    #[test]
    fn refused_context_destroy_is_reported() {
        let display = HeadlessDisplay::new();
        let faults = display.faults();
        let mut backend = backend(display);
        let context = backend.acquire_context().unwrap();
        faults.fail_context_destroy(ErrorCode::BadContext);
        let err = backend.release_context(context).unwrap_err();
        assert!(matches!(err, BackendError::Destroy { .. }));
    }

    #[test]
    fn context_creation_failure_terminates_display() {
        let display = HeadlessDisplay::new();
        let journal = display.journal();
        display.faults().fail_context_creation(ErrorCode::BadAlloc);
        let mut backend = backend(display);
        let err = backend.acquire_context().unwrap_err();
        assert_eq!(err.to_string(), "createContext failed: EGL_BAD_ALLOC");
        assert_eq!(journal.calls().last(), Some(&DisplayCall::Terminate));
    }
}
