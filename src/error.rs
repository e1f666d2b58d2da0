//! Error type for configuration loading and backend setup
//!
//! Layout itself never fails: degenerate graphs and numeric edge cases are
//! handled by doing nothing. Errors only surface where the outside world is
//! involved (reading files, acquiring a GPU).

use thiserror::Error;

/// Errors that can occur while configuring or constructing the engine
#[derive(Error, Debug)]
pub enum LayoutError {
    /// The file format is not supported
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file extension could not be determined
    #[error("could not determine file format from path: {0}")]
    UnknownExtension(String),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration or graph file could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// A configuration value would keep the simulation from converging
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No usable GPU adapter or device
    #[cfg(feature = "gpu")]
    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),
}

impl From<serde_json::Error> for LayoutError {
    fn from(err: serde_json::Error) -> Self {
        LayoutError::Parse(err.to_string())
    }
}

impl From<serde_yaml::Error> for LayoutError {
    fn from(err: serde_yaml::Error) -> Self {
        LayoutError::Parse(err.to_string())
    }
}

/// Result type for fallible engine operations
pub type Result<T> = std::result::Result<T, LayoutError>;
