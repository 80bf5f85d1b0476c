//! Error types for the engine's external seams.

use thiserror::Error;

/// Failure reported by a metrics or city-structure backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network or HTTP failure; retryable on the next trigger.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend has no map query configured for the metric.
    #[error("no map query configured for metric {0}")]
    NoMapQuery(String),
    /// The backend answered with an error status.
    #[error("backend error: {0}")]
    Backend(String),
    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// True for errors that must never be retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendError::NoMapQuery(_))
    }
}

/// Failure reported by the rendering surface adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    /// The surface does not know the layer.
    #[error("unknown layer {0}")]
    UnknownLayer(String),
    /// A layer with this id already exists.
    #[error("layer {0} already exists")]
    DuplicateLayer(String),
    /// A drawing primitive the layer needs is unavailable.
    #[error("missing primitive {0}")]
    MissingPrimitive(String),
    /// Any other adapter failure.
    #[error("surface failure: {0}")]
    Other(String),
}
