//! Error types for jobrelay.
//!
//! Library crates use [`RelayError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all jobrelay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Channel or store unreachable.
    #[error("transport error: {0}")]
    Transport(String),

    /// LLM or embedding call failed (HTTP error, quota, bad response).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Store reached but the operation was rejected or returned bad data.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Inbound data failed validation (missing query, bad vector, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Transport(_) => "transport",
            Self::Upstream(_) => "upstream",
            Self::Storage(_) => "storage",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
        }
    }
}
