use crate::window::Window;

/// Coarse classification used by binding layers to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested raster id is not registered.
    NotFound,
    /// The query itself is invalid or does not touch the raster.
    ClientInput,
    /// Registered data is unreachable or unreadable.
    DataError,
    /// Unexpected failure inside the engine.
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum StatsError {
    #[error("raster_id not found: {0}")]
    RasterNotFound(String),
    #[error("raster file missing for {id}: {path}")]
    RasterFileMissing { id: String, path: String },
    #[error("point ({x}, {y}) is outside the raster extent")]
    PointOutOfBounds { x: f64, y: f64 },
    #[error("empty window: {0}")]
    WindowEmpty(String),
    #[error("invalid reducer: {0}")]
    InvalidReducer(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("projection error: {0}")]
    Projection(String),
    #[error("raster read error: {0}")]
    Io(String),
    #[error("computation failed: {0}")]
    ComputationFailure(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl StatsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RasterNotFound(_) => ErrorKind::NotFound,
            Self::PointOutOfBounds { .. }
            | Self::WindowEmpty(_)
            | Self::InvalidReducer(_)
            | Self::InvalidArgument(_)
            | Self::Projection(_) => ErrorKind::ClientInput,
            Self::RasterFileMissing { .. } | Self::Io(_) => ErrorKind::DataError,
            Self::ComputationFailure(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// Empty-window error carrying the raster dimensions for the message.
    pub(crate) fn window_empty(width: usize, height: usize) -> Self {
        Self::WindowEmpty(format!(
            "geometry does not intersect raster ({width}x{height} pixels)"
        ))
    }

    /// Wrap an unexpected failure with the context needed to reproduce it and
    /// log it once at the point of wrapping.
    pub(crate) fn computation(
        raster_id: &str,
        window: Option<&Window>,
        geometry_digest: Option<&str>,
        detail: impl std::fmt::Display,
    ) -> Self {
        tracing::error!(
            raster_id,
            window = ?window,
            geometry = geometry_digest.unwrap_or("-"),
            "computation failure: {detail}"
        );
        Self::ComputationFailure(format!("{raster_id}: {detail}"))
    }
}

impl From<tiff::TiffError> for StatsError {
    fn from(value: tiff::TiffError) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<std::io::Error> for StatsError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
