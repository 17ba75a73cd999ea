//! Structured error taxonomy.
//!
//! Every fallible core operation returns [`Error`], which carries an
//! [`ErrorKind`] discriminant, a human-readable message, and optionally the
//! id of the affected resource. Backend errors (SQLite, HTTP) are wrapped at
//! the gateway boundary so callers never see a raw driver error.
//!
//! Retry policy lives with the callers: [`Error::is_retryable`] reports
//! whether a bounded-backoff retry is permitted for this kind.

use std::fmt;

/// Classification of every error the core can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input: missing required scope, non-absolute path, illegal URL.
    Validation,
    /// Project, dataset, job, or collection absent.
    NotFound,
    /// Idempotent create hit a conflicting prior state.
    AlreadyExists,
    /// A watcher already covers this (project, dataset, path).
    AlreadyWatching,
    /// Source requires credentials that were not provided.
    Unauthorized,
    /// Optimistic concurrency failure; the caller may retry.
    Conflict,
    /// Deadline exceeded on an external call.
    Timeout,
    /// External service is saturated; the caller should back off.
    Backpressure,
    /// Filesystem or network failure.
    Io,
    /// Embedding dimension does not match the target collection.
    DimensionMismatch,
    /// Sync snapshot cannot be deserialized; retry with a full rescan.
    CorruptSnapshot,
    /// The caller asked for cancellation.
    Cancelled,
    /// Invariant violated inside the core.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::AlreadyWatching => "already_watching",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::Io => "io",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::CorruptSnapshot => "corrupt_snapshot",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A structured core error.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Id of the affected resource (project, dataset, job, collection), if any.
    pub resource: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            resource: None,
            source: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    /// Whether a bounded exponential-backoff retry is permitted.
    ///
    /// `Timeout`, `Backpressure`, and `Io` are transient; everything else is
    /// either a caller mistake or a state that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::Backpressure | ErrorKind::Io
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, e.to_string()).with_source(e)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        let kind = match &e {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::PoolTimedOut => ErrorKind::Timeout,
            sqlx::Error::Database(db) if db.is_unique_violation() => ErrorKind::AlreadyExists,
            _ => ErrorKind::Io,
        };
        Error::new(kind, format!("metadata store: {e}")).with_source(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Io
        };
        Error::new(kind, e.to_string()).with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::new(ErrorKind::Timeout, "t").is_retryable());
        assert!(Error::new(ErrorKind::Backpressure, "b").is_retryable());
        assert!(Error::new(ErrorKind::Io, "i").is_retryable());
        assert!(!Error::new(ErrorKind::DimensionMismatch, "d").is_retryable());
        assert!(!Error::validation("v").is_retryable());
        assert!(!Error::cancelled().is_retryable());
    }

    #[test]
    fn display_includes_kind() {
        let e = Error::not_found("dataset missing").with_resource("ds_1");
        assert_eq!(e.to_string(), "not_found: dataset missing");
        assert_eq!(e.resource.as_deref(), Some("ds_1"));
    }
}
