use crate::display::ErrorCode;

/// Failures reported by the context backend adapter.
///
/// Whether one of these is fatal depends on where it happened: anything
/// raised while acquiring a context or destroying a resource ends the render
/// thread, while surface creation failures only mark the drawable as bad.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{function} failed: {code}")]
    Call {
        function: &'static str,
        code: ErrorCode,
    },
    #[error("no configs match config spec")]
    NoMatchingConfigs,
    #[error("no config chosen")]
    NoConfigChosen,
    #[error("no drawable available")]
    NoDrawable,
    #[error("window surface could not be created: {0}")]
    SurfaceUnavailable(ErrorCode),
    #[error("{function} failed: {code}")]
    Destroy {
        function: &'static str,
        code: ErrorCode,
    },
}

impl BackendError {
    pub(crate) fn call(function: &'static str, code: ErrorCode) -> Self {
        Self::Call { function, code }
    }
}

/// Reasons a render thread stopped without being asked to.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to acquire rendering context: {0}")]
    ContextAcquisition(#[source] BackendError),
    #[error("failed to release {resource}: {source}")]
    Release {
        resource: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("render thread panicked: {0}")]
    Panicked(String),
}

/// Precondition violations reported synchronously to facade callers.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),
}
