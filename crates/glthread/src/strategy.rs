//! Pluggable policies consulted by the context backend.
//!
//! A view carries one config chooser, one context factory and one surface
//! factory. They are fixed once the render thread has been started; views
//! that never set them get [`SimpleConfigChooser`], [`DefaultContextFactory`]
//! and [`DefaultSurfaceFactory`].

use tracing::error;
use viewconfig::{ComponentSizes, SurfaceRequest};

use crate::display::{format_error, ConfigDescriptor, ConfigSpec, Display, ErrorCode, RenderableType};
use crate::error::BackendError;

/// Picks the framebuffer configuration used for the context and its surfaces.
pub trait ConfigChooser<D: Display>: Send {
    fn choose_config(&self, display: &D) -> Result<ConfigDescriptor, BackendError>;
}

/// Wraps context creation and destruction.
pub trait ContextFactory<D: Display>: Send {
    fn create_context(
        &self,
        display: &mut D,
        config: &ConfigDescriptor,
        client_version: u32,
    ) -> Result<D::Context, ErrorCode>;

    /// A refusal to destroy is a resource accounting bug and is reported as
    /// [`BackendError::Destroy`].
    fn destroy_context(&self, display: &mut D, context: D::Context) -> Result<(), BackendError>;
}

/// Wraps window-surface creation and destruction.
pub trait SurfaceFactory<D: Display>: Send {
    /// An error means the surface cannot be constructed for this drawable
    /// right now; the caller treats it as recoverable.
    fn create_window_surface(
        &self,
        display: &mut D,
        config: &ConfigDescriptor,
        drawable: D::Drawable,
    ) -> Result<D::Surface, ErrorCode>;

    fn destroy_surface(&self, display: &mut D, surface: D::Surface) -> Result<(), BackendError>;
}

/// Supplies the native drawable when the render thread decides to create a
/// surface. Consulted with the shared monitor held.
pub trait DrawableSource<W>: Send {
    fn current_drawable(&self) -> Option<W>;
}

impl<W, F> DrawableSource<W> for F
where
    F: Fn() -> Option<W> + Send,
{
    fn current_drawable(&self) -> Option<W> {
        self()
    }
}

/// Chooses a config with exactly the requested red/green/blue/alpha sizes and
/// at least the requested depth and stencil sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSizeChooser {
    spec: ConfigSpec,
}

impl ComponentSizeChooser {
    pub fn new(
        red: u8,
        green: u8,
        blue: u8,
        alpha: u8,
        depth: u8,
        stencil: u8,
        client_version: u32,
    ) -> Self {
        Self {
            spec: ConfigSpec {
                red,
                green,
                blue,
                alpha,
                depth,
                stencil,
                renderable: RenderableType::for_client_version(client_version),
            },
        }
    }

    pub fn from_sizes(sizes: ComponentSizes, client_version: u32) -> Self {
        Self::new(
            sizes.red,
            sizes.green,
            sizes.blue,
            sizes.alpha,
            sizes.depth,
            sizes.stencil,
            client_version,
        )
    }

    pub fn spec(&self) -> &ConfigSpec {
        &self.spec
    }

    /// First candidate whose color sizes match exactly and whose depth and
    /// stencil sizes are large enough.
    pub fn select<'a>(&self, candidates: &'a [ConfigDescriptor]) -> Option<&'a ConfigDescriptor> {
        let spec = &self.spec;
        candidates.iter().find(|config| {
            config.depth >= spec.depth
                && config.stencil >= spec.stencil
                && config.red == spec.red
                && config.green == spec.green
                && config.blue == spec.blue
                && config.alpha == spec.alpha
        })
    }
}

impl<D: Display> ConfigChooser<D> for ComponentSizeChooser {
    fn choose_config(&self, display: &D) -> Result<ConfigDescriptor, BackendError> {
        let candidates = display
            .choose_configs(&self.spec)
            .map_err(|code| BackendError::call("eglChooseConfig", code))?;
        if candidates.is_empty() {
            return Err(BackendError::NoMatchingConfigs);
        }
        self.select(&candidates)
            .cloned()
            .ok_or(BackendError::NoConfigChosen)
    }
}

/// RGB888 with or without a 16-bit depth buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleConfigChooser(ComponentSizeChooser);

impl SimpleConfigChooser {
    pub fn new(with_depth_buffer: bool, client_version: u32) -> Self {
        let depth = if with_depth_buffer { 16 } else { 0 };
        Self(ComponentSizeChooser::new(8, 8, 8, 0, depth, 0, client_version))
    }

    pub fn spec(&self) -> &ConfigSpec {
        self.0.spec()
    }
}

impl<D: Display> ConfigChooser<D> for SimpleConfigChooser {
    fn choose_config(&self, display: &D) -> Result<ConfigDescriptor, BackendError> {
        ConfigChooser::<D>::choose_config(&self.0, display)
    }
}

/// Builds the chooser described by a view configuration's `[surface]` table.
pub fn chooser_for_request<D: Display>(
    request: SurfaceRequest,
    client_version: u32,
) -> Box<dyn ConfigChooser<D>> {
    match request {
        SurfaceRequest::Simple { depth_buffer } => {
            Box::new(SimpleConfigChooser::new(depth_buffer, client_version))
        }
        SurfaceRequest::Components(sizes) => {
            Box::new(ComponentSizeChooser::from_sizes(sizes, client_version))
        }
    }
}

/// Forwards straight to the display.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextFactory;

impl<D: Display> ContextFactory<D> for DefaultContextFactory {
    fn create_context(
        &self,
        display: &mut D,
        config: &ConfigDescriptor,
        client_version: u32,
    ) -> Result<D::Context, ErrorCode> {
        display.create_context(config, client_version)
    }

    fn destroy_context(&self, display: &mut D, context: D::Context) -> Result<(), BackendError> {
        display.destroy_context(context).map_err(|code| {
            error!(
                thread = ?std::thread::current().id(),
                "{}",
                format_error("eglDestroyContext", code)
            );
            BackendError::Destroy {
                function: "eglDestroyContext",
                code,
            }
        })
    }
}

/// Forwards straight to the display.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSurfaceFactory;

impl<D: Display> SurfaceFactory<D> for DefaultSurfaceFactory {
    fn create_window_surface(
        &self,
        display: &mut D,
        config: &ConfigDescriptor,
        drawable: D::Drawable,
    ) -> Result<D::Surface, ErrorCode> {
        display.create_window_surface(config, drawable)
    }

    fn destroy_surface(&self, display: &mut D, surface: D::Surface) -> Result<(), BackendError> {
        display
            .destroy_surface(surface)
            .map_err(|code| BackendError::Destroy {
                function: "eglDestroySurface",
                code,
            })
    }
}
