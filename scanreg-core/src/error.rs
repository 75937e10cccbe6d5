//! Error types for scanreg

use thiserror::Error;

/// Main error type for scanreg operations
///
/// Only structural problems (bad files, bad parameters) surface here.
/// Degraded descriptors, failed RANSAC searches and non-converged ICP runs
/// are reported through the status fields of their result types instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed point cloud: {0}")]
    MalformedPointCloud(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient neighborhood around query {query}: found {found}, need {required}")]
    InsufficientNeighborhood {
        query: usize,
        found: usize,
        required: usize,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No calibration entry for '{0}'")]
    MissingCalibration(String),
}

impl Error {
    /// Shorthand used by parameter validation throughout the workspace
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidParameter(message.into())
    }
}

/// Result type alias for scanreg operations
pub type Result<T> = std::result::Result<T, Error>;
