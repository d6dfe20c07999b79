//! Error types shared across the docindex workspace.
//!
//! Library crates produce [`DocIndexError`] via `thiserror`. Non-retryable
//! fetch failures carry their own richer [`FetchError`] (see `docindex-fetch`)
//! that wraps into `DocIndexError::Fetch` at crate boundaries.

use std::path::PathBuf;

/// Top-level error type for all docindex operations.
#[derive(Debug, thiserror::Error)]
pub enum DocIndexError {
    /// Configuration loading or validation error. Non-fatal where spec.md
    /// says so (e.g. missing embedding credentials only disables vector
    /// search); callers decide fatality, this variant just carries the text.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error not otherwise classified as a `FetchError`.
    #[error("network error: {0}")]
    Network(String),

    /// Content-processing error (DOM parse, markdown conversion, splitter).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Store (libsql) error: connection, migration, or integrity violation.
    #[error("storage error: {0}")]
    Storage(String),

    /// Fetcher error (retried transient failures surface only as final
    /// exhaustion here; see `docindex_fetch::FetchError` for the full kind).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Job scheduling/lifecycle error.
    #[error("job error: {0}")]
    Job(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocIndexError>;

impl DocIndexError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn job(msg: impl Into<String>) -> Self {
        Self::Job(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocIndexError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DocIndexError::validation("schema_version 99 not supported");
        assert!(err.to_string().contains("schema_version 99"));
    }
}
