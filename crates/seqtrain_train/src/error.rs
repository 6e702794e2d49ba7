//! Error types for training.

use thiserror::Error;

/// Result type alias for training operations.
pub type Result<T> = std::result::Result<T, TrainError>;

/// Errors that can occur during training.
#[derive(Error, Debug)]
pub enum TrainError {
    /// A configured metric is absent from a forward-pass output.
    #[error("Metric '{key}' missing from output (available: {available:?})")]
    MissingMetric {
        /// Requested key.
        key: String,
        /// Keys the output did contain.
        available: Vec<String>,
    },

    /// A metric used for optimization or selection is a tensor, not a scalar.
    #[error("Metric '{0}' is not a scalar")]
    NonScalarMetric(String),

    /// Inconsistent trainer setup, detected before training starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A snapshot does not fit the model it is restored into.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Forward pass failed.
    #[error("Forward pass failed: {0}")]
    ForwardError(String),

    /// Backward pass failed.
    #[error("Backward pass failed: {0}")]
    BackwardError(String),

    /// Optimizer step failed.
    #[error("Optimizer step failed: {0}")]
    OptimizerError(String),

    /// Callback error.
    #[error("Callback error: {0}")]
    CallbackError(String),

    /// Data error.
    #[error("Data error: {0}")]
    DataError(#[from] seqtrain_data::DataError),

    /// Core error.
    #[error("Core error: {0}")]
    CoreError(#[from] seqtrain_core::CoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
