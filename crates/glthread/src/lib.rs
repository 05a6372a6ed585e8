//! Render-thread lifecycle management for GL-style views.
//!
//! Each view owns one dedicated render thread. The host's UI thread reports
//! drawable, size and pause events through [`RenderView`]; the render thread
//! decides from those flags when to acquire or release its context and
//! surface, when to call the [`Renderer`], and when to sleep. All threads of a
//! process synchronize through one shared [`ContextResourceManager`]:
//!
//! ```text
//!   host thread
//!       │ RenderView::{surface_available, resize, pause, ...}
//!       ▼
//!   ContextResourceManager (mutex + condvar) ◀──── notify_all ────┐
//!       │ shared RenderWorkerState                                │
//!       ▼                                                         │
//!   RenderWorker::run ──▶ transition() ──▶ ContextBackend<D> ─────┘
//!                               │                │
//!                               │                └─▶ Display (EGL-like)
//!                               └─▶ Renderer callbacks (monitor released)
//! ```
//!
//! The backend is generic over [`Display`]; [`HeadlessDisplay`] is a software
//! implementation with a call journal and fault injection.

mod backend;
mod display;
mod error;
mod headless;
mod monitor;
mod renderer;
mod state;
mod strategy;
mod types;
mod view;
mod worker;

pub use backend::{ContextBackend, PresentOutcome, Strategies};
pub use display::{
    format_error, ConfigDescriptor, ConfigSpec, Display, ErrorCode, RenderableType,
};
pub use error::{BackendError, ViewError, WorkerError};
pub use headless::{
    DisplayCall, DisplayJournal, FaultInjector, HeadlessContext, HeadlessDisplay, HeadlessSurface,
    HeadlessWindow,
};
pub use monitor::{ContextResourceManager, WorkerId};
pub use renderer::{RenderContext, Renderer};
pub use strategy::{
    chooser_for_request, ComponentSizeChooser, ConfigChooser, ContextFactory, DefaultContextFactory,
    DefaultSurfaceFactory, DrawableSource, SimpleConfigChooser, SurfaceFactory,
};
pub use types::{DebugFlags, ExitStatus, RenderMode, ViewSettings};
pub use view::RenderView;
