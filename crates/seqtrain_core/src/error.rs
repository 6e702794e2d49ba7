//! Error types for seqtrain_core.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by core type conversions.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A split name could not be parsed.
    #[error("Unknown split '{0}': expected one of train, dev, test")]
    UnknownSplit(String),

    /// Shape mismatch between arrays.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}
