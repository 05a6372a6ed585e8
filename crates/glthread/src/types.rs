use viewconfig::{RenderModeSetting, SurfaceRequest, ViewConfig};

use crate::error::ViewError;

/// Whether the render thread draws only on request or on every pass it can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Draw once per `request_render` (or resize/resume).
    WhenDirty,
    /// Draw on every iteration while a drawable is available.
    #[default]
    Continuously,
}

impl RenderMode {
    pub fn code(self) -> i32 {
        match self {
            Self::WhenDirty => 0,
            Self::Continuously => 1,
        }
    }
}

impl TryFrom<i32> for RenderMode {
    type Error = ViewError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::WhenDirty),
            1 => Ok(Self::Continuously),
            other => Err(ViewError::InvalidArgument(format!(
                "render mode {other} is not one of 0 (when dirty) or 1 (continuously)"
            ))),
        }
    }
}

impl From<RenderModeSetting> for RenderMode {
    fn from(setting: RenderModeSetting) -> Self {
        match setting {
            RenderModeSetting::WhenDirty => Self::WhenDirty,
            RenderModeSetting::Continuously => Self::Continuously,
        }
    }
}

/// Diagnostics toggles applied on the render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugFlags {
    /// Query the display for a pending error after every frame.
    pub check_errors: bool,
    /// Trace each renderer callback.
    pub log_calls: bool,
}

/// Per-view settings fixed when the render thread starts, apart from
/// `render_mode` and `preserve_context_on_pause` which stay live.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSettings {
    pub render_mode: RenderMode,
    pub preserve_context_on_pause: bool,
    pub context_client_version: u32,
    pub debug: DebugFlags,
    pub surface: SurfaceRequest,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::default(),
            preserve_context_on_pause: false,
            context_client_version: 3,
            debug: DebugFlags::default(),
            surface: SurfaceRequest::Simple { depth_buffer: true },
        }
    }
}

impl ViewSettings {
    pub fn from_config(config: &ViewConfig) -> Self {
        Self {
            render_mode: config.render_mode().into(),
            preserve_context_on_pause: config.view.preserve_context_on_pause,
            context_client_version: config.view.context_client_version,
            debug: DebugFlags {
                check_errors: config.debug.check_errors,
                log_calls: config.debug.log_calls,
            },
            surface: config.surface_request(),
        }
    }
}

/// How a view's render thread is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// No render thread has been started yet.
    NotStarted,
    Running,
    /// Exited after `request_exit_and_wait`.
    Exited,
    /// Exited without being asked to: a fatal backend error or a panic.
    Crashed,
}
