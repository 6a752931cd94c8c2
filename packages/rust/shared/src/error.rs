//! Error types for the images field pipeline.
//!
//! Library crates use [`ImageFieldError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all image field operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageFieldError {
    /// Field or application configuration error. Raised at construction time.
    #[error("config error: {message}")]
    Config { message: String },

    /// A single upload failed; the whole reconciliation pass is aborted.
    #[error("upload failed for {source_desc}: {message}")]
    Upload {
        source_desc: String,
        message: String,
    },

    /// Network/HTTP error while fetching a remote upload source.
    #[error("network error: {0}")]
    Network(String),

    /// Decoding error (data URI payload, stored field JSON).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or item store error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown item, unresolvable upload reference, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ImageFieldError>;

impl ImageFieldError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an upload error for the given source description.
    pub fn upload(source_desc: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upload {
            source_desc: source_desc.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
