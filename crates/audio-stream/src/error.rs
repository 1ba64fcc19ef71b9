//! Error types surfaced at the stream source boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The effects stage failed in a way that must not be retried.
    #[error("effects transform failed")]
    Transform,

    /// Underlying I/O failed (file-backed sources, producer thread spawn).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
