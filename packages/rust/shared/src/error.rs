//! Error types for JobPulse.
//!
//! Library crates use [`JobPulseError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Recoverable per-item problems (a page that could not be fetched, a listing
//! that failed validation) are *values*, see [`crate::FetchFailure`] and
//! [`crate::ValidationFailure`]. Only conditions that stop a whole operation
//! are represented here.

use std::path::PathBuf;

/// Top-level error type for all JobPulse operations.
#[derive(Debug, thiserror::Error)]
pub enum JobPulseError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a listing source.
    #[error("network error: {0}")]
    Network(String),

    /// Response body or field parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The store could not be opened, read, or written. Fatal for a run.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A trigger arrived while another pipeline run was active.
    #[error("a pipeline run is already in progress")]
    RunInProgress,

    /// The operation was aborted by a stop signal.
    #[error("cancelled during {stage}")]
    Cancelled { stage: String },

    /// A background stage task panicked or was aborted.
    #[error("{stage} task failed: {message}")]
    TaskFailed { stage: String, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, JobPulseError>;

impl JobPulseError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Create a store error from any displayable message.
    pub fn store(msg: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(msg.to_string())
    }

    /// Create a cancellation error for the named stage.
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = JobPulseError::config("missing sources");
        assert_eq!(err.to_string(), "config error: missing sources");

        let err = JobPulseError::store("disk full");
        assert_eq!(err.to_string(), "store unavailable: disk full");

        let err = JobPulseError::cancelled("fetching");
        assert_eq!(err.to_string(), "cancelled during fetching");
    }
}
