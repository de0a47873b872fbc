//! Error types for memc-load

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Errors that end a whole loader run.
///
/// Per-line and per-record problems never become a `LoadError`; they are
/// counted and logged by the pipeline. Only the variants below stop the run.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Filesystem failure outside a batch
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid command-line or environment settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Batch glob does not compile
    #[error("Invalid batch pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// Processed batch could not be renamed
    #[error("Failed to checkpoint {}: {source}", path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl LoadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
