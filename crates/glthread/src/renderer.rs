use crate::display::{ConfigDescriptor, Display};
use crate::types::DebugFlags;

/// Client drawing code. Every method runs on the render thread with the
/// context current and the shared monitor released.
pub trait Renderer<D: Display>: Send {
    /// A new context was created, either at startup or after the previous one
    /// was lost or released. Any resources tied to the old context are gone.
    fn on_context_created(&mut self, context: &RenderContext<'_, D>);

    /// The surface was (re)created or the view was resized.
    fn on_geometry_changed(&mut self, context: &RenderContext<'_, D>, width: u32, height: u32);

    fn on_draw_frame(&mut self, context: &RenderContext<'_, D>);
}

/// Borrowed view of the render thread's backend handed to renderer callbacks.
pub struct RenderContext<'a, D: Display> {
    display: &'a D,
    context: &'a D::Context,
    surface: &'a D::Surface,
    config: Option<&'a ConfigDescriptor>,
    debug: DebugFlags,
}

impl<'a, D: Display> RenderContext<'a, D> {
    pub(crate) fn new(
        display: &'a D,
        context: &'a D::Context,
        surface: &'a D::Surface,
        config: Option<&'a ConfigDescriptor>,
        debug: DebugFlags,
    ) -> Self {
        Self {
            display,
            context,
            surface,
            config,
            debug,
        }
    }

    pub fn display(&self) -> &'a D {
        self.display
    }

    pub fn context(&self) -> &'a D::Context {
        self.context
    }

    pub fn surface(&self) -> &'a D::Surface {
        self.surface
    }

    /// Config the context was created with.
    pub fn config(&self) -> Option<&'a ConfigDescriptor> {
        self.config
    }

    pub fn debug(&self) -> DebugFlags {
        self.debug
    }
}
