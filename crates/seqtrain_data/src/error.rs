//! Error types for seqtrain_data.

use thiserror::Error;

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur while building or slicing sequence datasets.
#[derive(Error, Debug)]
pub enum DataError {
    /// Invalid array shape.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// A supplemental signal does not share the primary signal's time length.
    #[error("Signal '{key}' has {got} time steps but primary signal '{primary}' has {expected}")]
    LengthMismatch {
        /// Offending signal key.
        key: String,
        /// Primary signal key.
        primary: String,
        /// Time length of the primary signal.
        expected: usize,
        /// Time length of the offending signal.
        got: usize,
    },

    /// The dataset was configured without any way to obtain data.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Normalization bounds are inconsistent with the data or each other.
    #[error("Invalid normalization bounds: {0}")]
    InvalidBounds(String),

    /// Horizon of zero steps.
    #[error("Invalid horizon {0}: must be at least 1")]
    InvalidHorizon(usize),

    /// A signal is too short to form a single window.
    #[error("Signal '{key}' has {len} usable time steps, fewer than one window of {horizon}")]
    InsufficientLength {
        /// Signal key.
        key: String,
        /// Usable time steps.
        len: usize,
        /// Horizon length.
        horizon: usize,
    },

    /// A key was requested that the bundle or batch does not hold.
    #[error("Missing key '{0}'")]
    MissingKey(String),

    /// Invalid batch size.
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// File format error.
    #[error("File format error: {0}")]
    FormatError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] seqtrain_core::CoreError),
}
