//! Platform primitives the context backend is built on.
//!
//! `Display` mirrors the handful of EGL entry points the render thread needs
//! (initialize/terminate, config selection, context and window-surface
//! creation, make-current and buffer swap). Everything above it talks in terms
//! of [`ErrorCode`] so backend failures keep the EGL taxonomy regardless of
//! what actually implements the trait.

use std::fmt;

/// EGL-style error codes reported by a [`Display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    BadAccess,
    BadAlloc,
    BadAttribute,
    BadConfig,
    BadContext,
    BadCurrentSurface,
    BadDisplay,
    BadMatch,
    BadNativePixmap,
    BadNativeWindow,
    BadParameter,
    BadSurface,
    ContextLost,
    Other(u32),
}

const EGL_SUCCESS: u32 = 0x3000;

impl ErrorCode {
    /// Maps a raw EGL error value. `EGL_SUCCESS` has no error code.
    pub fn from_raw(raw: u32) -> Option<Self> {
        let code = match raw {
            EGL_SUCCESS => return None,
            0x3001 => Self::NotInitialized,
            0x3002 => Self::BadAccess,
            0x3003 => Self::BadAlloc,
            0x3004 => Self::BadAttribute,
            0x3005 => Self::BadConfig,
            0x3006 => Self::BadContext,
            0x3007 => Self::BadCurrentSurface,
            0x3008 => Self::BadDisplay,
            0x3009 => Self::BadMatch,
            0x300A => Self::BadNativePixmap,
            0x300B => Self::BadNativeWindow,
            0x300C => Self::BadParameter,
            0x300D => Self::BadSurface,
            0x300E => Self::ContextLost,
            other => Self::Other(other),
        };
        Some(code)
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::NotInitialized => 0x3001,
            Self::BadAccess => 0x3002,
            Self::BadAlloc => 0x3003,
            Self::BadAttribute => 0x3004,
            Self::BadConfig => 0x3005,
            Self::BadContext => 0x3006,
            Self::BadCurrentSurface => 0x3007,
            Self::BadDisplay => 0x3008,
            Self::BadMatch => 0x3009,
            Self::BadNativePixmap => 0x300A,
            Self::BadNativeWindow => 0x300B,
            Self::BadParameter => 0x300C,
            Self::BadSurface => 0x300D,
            Self::ContextLost => 0x300E,
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotInitialized => "EGL_NOT_INITIALIZED",
            Self::BadAccess => "EGL_BAD_ACCESS",
            Self::BadAlloc => "EGL_BAD_ALLOC",
            Self::BadAttribute => "EGL_BAD_ATTRIBUTE",
            Self::BadConfig => "EGL_BAD_CONFIG",
            Self::BadContext => "EGL_BAD_CONTEXT",
            Self::BadCurrentSurface => "EGL_BAD_CURRENT_SURFACE",
            Self::BadDisplay => "EGL_BAD_DISPLAY",
            Self::BadMatch => "EGL_BAD_MATCH",
            Self::BadNativePixmap => "EGL_BAD_NATIVE_PIXMAP",
            Self::BadNativeWindow => "EGL_BAD_NATIVE_WINDOW",
            Self::BadParameter => "EGL_BAD_PARAMETER",
            Self::BadSurface => "EGL_BAD_SURFACE",
            Self::ContextLost => "EGL_CONTEXT_LOST",
            Self::Other(raw) => return write!(f, "0x{raw:x}"),
        };
        f.write_str(name)
    }
}

/// Renders `"<function> failed: <code>"`, the message used for every logged
/// or raised backend failure.
pub fn format_error(function: &str, code: ErrorCode) -> String {
    format!("{function} failed: {code}")
}

/// Client API a config must be renderable with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderableType {
    Es2,
    Es3,
}

impl RenderableType {
    /// Renderable filter implied by a context client version. Only versions 2
    /// and 3 constrain the config search.
    pub fn for_client_version(version: u32) -> Option<Self> {
        match version {
            2 => Some(Self::Es2),
            3 => Some(Self::Es3),
            _ => None,
        }
    }
}

/// Attribute request handed to [`Display::choose_configs`]. Sizes are
/// minimums, as with `eglChooseConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSpec {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
    pub depth: u8,
    pub stencil: u8,
    pub renderable: Option<RenderableType>,
}

/// A concrete framebuffer configuration offered by a display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub id: u32,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
    pub depth: u8,
    pub stencil: u8,
    pub es2: bool,
    pub es3: bool,
}

impl ConfigDescriptor {
    pub fn supports(&self, renderable: RenderableType) -> bool {
        match renderable {
            RenderableType::Es2 => self.es2,
            RenderableType::Es3 => self.es3,
        }
    }

    /// True when every component is at least as large as requested and the
    /// renderable type (if any) is supported.
    pub fn satisfies(&self, spec: &ConfigSpec) -> bool {
        self.red >= spec.red
            && self.green >= spec.green
            && self.blue >= spec.blue
            && self.alpha >= spec.alpha
            && self.depth >= spec.depth
            && self.stencil >= spec.stencil
            && spec.renderable.map_or(true, |kind| self.supports(kind))
    }
}

/// Raw platform operations used by [`ContextBackend`](crate::ContextBackend).
///
/// Implementations are moved onto the render thread and only ever called
/// from there, so the handles they produce need to be `Send` but not `Sync`.
pub trait Display: Send + 'static {
    type Context: Send + 'static;
    type Surface: Send + 'static;
    /// Native window handle a surface is created for.
    type Drawable: Send + 'static;

    /// Initializes the display connection, returning the (major, minor) version.
    fn initialize(&mut self) -> Result<(u32, u32), ErrorCode>;
    fn terminate(&mut self);
    fn choose_configs(&self, spec: &ConfigSpec) -> Result<Vec<ConfigDescriptor>, ErrorCode>;
    fn create_context(
        &mut self,
        config: &ConfigDescriptor,
        client_version: u32,
    ) -> Result<Self::Context, ErrorCode>;
    fn destroy_context(&mut self, context: Self::Context) -> Result<(), ErrorCode>;
    fn create_window_surface(
        &mut self,
        config: &ConfigDescriptor,
        drawable: Self::Drawable,
    ) -> Result<Self::Surface, ErrorCode>;
    fn destroy_surface(&mut self, surface: Self::Surface) -> Result<(), ErrorCode>;
    /// Binds `(surface, context)` to the calling thread, or unbinds when `None`.
    fn make_current(
        &mut self,
        binding: Option<(&Self::Surface, &Self::Context)>,
    ) -> Result<(), ErrorCode>;
    fn swap_buffers(&mut self, surface: &Self::Surface) -> Result<(), ErrorCode>;

    /// Pending error from the client API, consulted when error checking is
    /// enabled in the view's debug flags.
    fn check_error(&mut self) -> Option<ErrorCode> {
        None
    }
}
